//-
// Copyright (c) 2024, the arcfilter authors
//
// This file is part of arcfilter.
//
// arcfilter is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// arcfilter is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// arcfilter. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement
/// about one message.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    peer: Option<String>,
    queue_id: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                queue_id: None,
            })),
        }
    }

    pub fn set_peer(&self, peer: String) {
        self.inner.lock().unwrap().peer = Some(sanitise(peer));
    }

    pub fn set_queue_id(&self, queue_id: String) {
        self.inner.lock().unwrap().queue_id = Some(sanitise(queue_id));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.protocol)?;
        if let Some(ref peer) = inner.peer {
            write!(f, "[{peer}]")?;
        }
        if let Some(ref queue_id) = inner.queue_id {
            write!(f, ":{queue_id}")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_prefix() {
        let prefix = LogPrefix::new("arc".to_owned());
        assert_eq!("arc", prefix.to_string());

        let clone = prefix.clone();
        clone.set_queue_id("4XyZ\n12".to_owned());
        assert_eq!("arc:4XyZ12", prefix.to_string());

        prefix.set_peer("192.0.2.1".to_owned());
        assert_eq!("arc[192.0.2.1]:4XyZ12", prefix.to_string());

        prefix.set_peer("x".repeat(100));
        assert_eq!(
            format!("arc[{}]:4XyZ12", "x".repeat(64)),
            prefix.to_string(),
        );
    }
}

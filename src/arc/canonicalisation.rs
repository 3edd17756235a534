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

//! RFC 6376 § 3.4 canonicalisation, as reused by RFC 8617.

use std::fmt;
use std::io::{self, Write};

use crate::mime::header::FWS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HeaderCanonicalisation {
    #[default]
    Simple,
    Relaxed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BodyCanonicalisation {
    #[default]
    Simple,
    Relaxed,
}

impl fmt::Display for HeaderCanonicalisation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Simple => write!(f, "simple"),
            Self::Relaxed => write!(f, "relaxed"),
        }
    }
}

impl fmt::Display for BodyCanonicalisation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Simple => write!(f, "simple"),
            Self::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// The `c=` tag of an `ARC-Message-Signature`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct Canonicalisation {
    pub header: HeaderCanonicalisation,
    pub body: BodyCanonicalisation,
}

impl Canonicalisation {
    pub const RELAXED: Self = Self {
        header: HeaderCanonicalisation::Relaxed,
        body: BodyCanonicalisation::Relaxed,
    };

    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim_matches(FWS).to_ascii_lowercase();
        let (header, body) = s.split_once('/').unwrap_or((&s, "simple"));

        let header = match header {
            "simple" => HeaderCanonicalisation::Simple,
            "relaxed" => HeaderCanonicalisation::Relaxed,
            h => return Err(format!("unknown header canonicalisation: {h}")),
        };
        let body = match body {
            "simple" => BodyCanonicalisation::Simple,
            "relaxed" => BodyCanonicalisation::Relaxed,
            b => return Err(format!("unknown body canonicalisation: {b}")),
        };

        Ok(Self { header, body })
    }
}

impl fmt::Display for Canonicalisation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.header, self.body)
    }
}

impl TryFrom<String> for Canonicalisation {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        Self::parse(&s)
    }
}

impl HeaderCanonicalisation {
    /// Canonicalises one full header line (`Name:value`, without the line
    /// ending). The caller appends CRLF where the hash input needs one.
    pub fn canonicalise(self, line: &str) -> String {
        match self {
            Self::Simple => line.to_owned(),
            Self::Relaxed => {
                let Some((name, value)) = line.split_once(':') else {
                    return collapse_fws(line);
                };

                let mut out = String::with_capacity(line.len());
                out.push_str(&name.trim_matches(FWS).to_ascii_lowercase());
                out.push(':');
                out.push_str(&collapse_fws(value));
                out
            },
        }
    }
}

/// Unfolds, turns every run of whitespace into one space, and trims.
fn collapse_fws(s: &str) -> String {
    s.split(FWS)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Performs body canonicalisation in a streaming fashion.
///
/// Only complete lines are passed on; empty lines are held back until
/// something other than an empty line follows, so trailing empty lines are
/// never written. `finish` must be called to flush the final line.
pub struct BodyCanonicaliser<W> {
    inner: W,
    mode: BodyCanonicalisation,
    partial: Vec<u8>,
    held_blank_lines: usize,
    wrote_anything: bool,
}

impl<W: Write> BodyCanonicaliser<W> {
    pub fn new(inner: W, mode: BodyCanonicalisation) -> Self {
        Self {
            inner,
            mode,
            partial: Vec::new(),
            held_blank_lines: 0,
            wrote_anything: false,
        }
    }

    pub fn finish(mut self) -> io::Result<W> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.line(&line)?;
        }

        // An empty body is a single CRLF under simple canonicalisation and
        // nothing at all under relaxed (RFC 6376 errata 3192).
        if !self.wrote_anything && BodyCanonicalisation::Simple == self.mode {
            self.inner.write_all(b"\r\n")?;
        }

        Ok(self.inner)
    }

    fn line(&mut self, line: &[u8]) -> io::Result<()> {
        let relaxed;
        let line = match self.mode {
            BodyCanonicalisation::Simple => line,
            BodyCanonicalisation::Relaxed => {
                relaxed = relax_line(line);
                &relaxed[..]
            },
        };

        if line.is_empty() {
            self.held_blank_lines += 1;
            return Ok(());
        }

        for _ in 0..self.held_blank_lines {
            self.inner.write_all(b"\r\n")?;
        }
        self.held_blank_lines = 0;
        self.inner.write_all(line)?;
        self.inner.write_all(b"\r\n")?;
        self.wrote_anything = true;
        Ok(())
    }
}

fn relax_line(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut pending_space = false;
    for &b in line {
        if b' ' == b || b'\t' == b {
            pending_space = true;
            continue;
        }

        if pending_space {
            out.push(b' ');
            pending_space = false;
        }
        out.push(b);
    }
    out
}

impl<W: Write> Write for BodyCanonicaliser<W> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(src);

        let mut consumed = 0;
        while let Some(end) =
            memchr::memmem::find(&self.partial[consumed..], b"\r\n")
        {
            let line = self.partial[consumed..consumed + end].to_vec();
            self.line(&line)?;
            consumed += end + 2;
        }
        self.partial.drain(..consumed);

        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

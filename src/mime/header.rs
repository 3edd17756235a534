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

//! Raw header fields as handed over by the mail server.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::bytes::Regex;

/// Folding whitespace characters.
pub const FWS: &[char] = &[' ', '\t', '\r', '\n'];

lazy_static! {
    /// Matches one complete (possibly folded) header field within a header
    /// block. Group 1 is the field name, group 2 the raw value following the
    /// colon, excluding the final line ending.
    static ref FULL_HEADER_LINE: Regex = Regex::new(
        r"(?m-u)^([!-9;-~]+[ \t]*):([^\r\n]*(?:\r?\n[ \t][^\r\n]*)*)"
    )
    .unwrap();
}

/// A single header field, exactly as it appears in the message.
///
/// `value` is everything after the colon, including any leading space and
/// embedded folding, but never the line ending which terminates the field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns whether this field has the given name, ignoring case.
    pub fn is(&self, name: &str) -> bool {
        self.name.trim_end_matches(FWS).eq_ignore_ascii_case(name)
    }

    /// The full header line, `Name:value`, without line ending.
    pub fn line(&self) -> String {
        format!("{}:{}", self.name, self.value)
    }

    /// The byte length of the field once written out with its CRLF.
    pub fn wire_len(&self) -> usize {
        self.name.len() + 1 + self.value.len() + 2
    }
}

/// Splits a message into its header block and body.
///
/// The header block excludes the blank line; if there is no blank line, the
/// whole message is headers and the body is empty.
pub fn split_message(message: &[u8]) -> (&[u8], &[u8]) {
    if let Some(blank) = memchr::memmem::find(message, b"\r\n\r\n") {
        (&message[..blank + 2], &message[blank + 4..])
    } else if message.starts_with(b"\r\n") {
        (&[], &message[2..])
    } else {
        (message, &[])
    }
}

/// Parses a raw header block into its fields, in order.
///
/// Lines which do not look like header fields are skipped. Field content that
/// is not valid UTF-8 is replaced lossily.
pub fn parse_header_block(block: &[u8]) -> Vec<HeaderField> {
    FULL_HEADER_LINE
        .captures_iter(block)
        .filter_map(|m| {
            let name = m.get(1)?.as_bytes();
            let value = m.get(2)?.as_bytes();
            Some(HeaderField {
                name: String::from_utf8_lossy(name).into_owned(),
                value: String::from_utf8_lossy(value).into_owned(),
            })
        })
        .collect()
}

/// Converts bare LF line endings to CRLF.
pub fn fix_crlf(data: &[u8]) -> Cow<'_, [u8]> {
    let needs_fixing = data
        .iter()
        .enumerate()
        .any(|(ix, &b)| b'\n' == b && (0 == ix || b'\r' != data[ix - 1]));
    if !needs_fixing {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut prev = 0u8;
    for &b in data {
        if b'\n' == b && b'\r' != prev {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    Cow::Owned(out)
}

/// Like `fix_crlf`, but for header values received as text.
pub fn fix_crlf_str(s: &str) -> Cow<'_, str> {
    match fix_crlf(s.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(s),
        // Inserting CRs cannot break UTF-8 sequences.
        Cow::Owned(v) => Cow::Owned(String::from_utf8_lossy(&v).into_owned()),
    }
}

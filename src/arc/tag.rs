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

//! DKIM-style `tag=value` lists (RFC 6376 § 3.2), shared by all three ARC
//! headers and by key records.

use std::borrow::Cow;
use std::ops::Range;

use chrono::prelude::*;

use crate::mime::header::FWS;

/// Iterates the `tag=value` pairs of `s`.
///
/// Tags and values come back trimmed but otherwise undecoded. The range is
/// that of the untrimmed value within `s`, which is exactly what must be
/// blanked out to produce the signing input for `b=`.
pub fn split_tags(
    s: &str,
) -> impl Iterator<Item = (&str, &str, Range<usize>)> + '_ {
    s.split(';')
        .scan(0usize, |offset, group| {
            let start = *offset;
            *offset += group.len() + 1;
            Some((start, group))
        })
        .filter_map(|(start, group)| {
            let (tag, value) = group.split_once('=')?;
            let value_start = start + tag.len() + 1;
            Some((
                tag.trim_matches(FWS),
                value.trim_matches(FWS),
                value_start..value_start + value.len(),
            ))
        })
}

/// Records `value` for `tag`, failing if the tag was already seen.
pub fn set_once<T>(
    tag: &str,
    slot: &mut Option<T>,
    value: T,
) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("duplicate {tag}= tag"));
    }

    *slot = Some(value);
    Ok(())
}

/// Requires a tag to have been present.
pub fn required<T>(tag: &str, slot: Option<T>) -> Result<T, String> {
    slot.ok_or_else(|| format!("missing {tag}= tag"))
}

/// Decodes base64 that may contain folding whitespace.
pub fn decode_base64(s: &str) -> Vec<u8> {
    fn is_base64_char(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || matches!(ch, '+' | '/' | '=')
    }

    let compact: Cow<'_, str> = if s.chars().all(is_base64_char) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.chars().filter(|&c| is_base64_char(c)).collect())
    };

    base64::decode_config(
        compact.as_bytes(),
        base64::Config::new(base64::CharacterSet::Standard, true)
            .decode_allow_trailing_bits(true),
    )
    .unwrap_or_default()
}

/// Parses an instance number (`i=`). Zero and anything non-numeric is
/// rejected; the upper bound is enforced by the chain.
pub fn parse_instance(s: &str) -> Result<u32, String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("bad instance number: {s}"));
    }

    match s.parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("bad instance number: {s}")),
        Ok(n) => Ok(n),
    }
}

/// Parses a UNIX timestamp. Out-of-range values are clamped.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    let seconds = s
        .parse::<i64>()
        .map_err(|_| format!("bad timestamp: {s}"))?
        .max(0);
    Ok(DateTime::<Utc>::from_timestamp(seconds, 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC))
}

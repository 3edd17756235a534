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

//! Tokeniser for structured header values in the style of RFC 8601.
//!
//! The grammar borrows RFC 5322's comments and quoted strings and RFC 2045's
//! tokens. Comments and quoted strings are extracted here; everything else
//! is left to the parser as atoms and single-character specials.

use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while1},
    character::complete::char,
    combinator::{map, recognize},
    multi::fold_many0,
    sequence::{delimited, preceded},
    IResult,
};

use super::MalformedHeader;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    /// A run of characters that are not whitespace, specials, or delimiters.
    Atom(&'a str),
    /// The decoded content of a quoted string.
    Quoted(String),
    /// The content of a comment, with whitespace collapsed. Nested comments
    /// are included with their parentheses.
    Comment(String),
    /// One of `;`, `=`, `.`, `/`.
    Special(char),
    /// Any run of folding whitespace.
    Space,
}

const SPECIALS: &str = ";=./";

fn is_fws(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n')
}

fn is_atom_char(ch: char) -> bool {
    !is_fws(ch)
        && !ch.is_control()
        && !SPECIALS.contains(ch)
        && !matches!(ch, '(' | ')' | '"' | '\\')
}

fn quoted_pair(i: &str) -> IResult<&str, &str> {
    preceded(char('\\'), take(1usize))(i)
}

fn quoted_string(i: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        fold_many0(
            alt((is_not("\\\""), quoted_pair)),
            String::new(),
            |mut acc: String, s: &str| {
                // Folding inside quoted strings is not part of the content.
                acc.extend(s.chars().filter(|&c| '\r' != c && '\n' != c));
                acc
            },
        ),
        char('"'),
    )(i)
}

fn comment_content(i: &str) -> IResult<&str, Cow<'_, str>> {
    alt((
        map(is_not("()\\"), Cow::Borrowed),
        map(recognize(quoted_pair), Cow::Borrowed),
        map(comment, |c| Cow::Owned(format!("({c})"))),
    ))(i)
}

fn comment(i: &str) -> IResult<&str, String> {
    delimited(
        tag("("),
        fold_many0(comment_content, String::new(), |mut acc, s| {
            acc.push_str(&s);
            acc
        }),
        char(')'),
    )(i)
}

fn atom(i: &str) -> IResult<&str, &str> {
    take_while1(is_atom_char)(i)
}

fn collapse_whitespace(s: &str) -> String {
    s.split(is_fws)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits `s` into tokens.
///
/// Fails on unterminated comments and quoted strings, stray `)` or `\`, and
/// control characters outside of quoted strings and comments.
pub fn tokenise(mut s: &str) -> Result<Vec<Token<'_>>, MalformedHeader> {
    let mut tokens = Vec::new();

    while let Some(ch) = s.chars().next() {
        let (rest, token) = if is_fws(ch) {
            let end = s.find(|c| !is_fws(c)).unwrap_or(s.len());
            (&s[end..], Token::Space)
        } else if SPECIALS.contains(ch) {
            (&s[ch.len_utf8()..], Token::Special(ch))
        } else if '(' == ch {
            let (rest, c) = comment(s).map_err(|_| {
                MalformedHeader::new(format!("unterminated comment: {s}"))
            })?;
            (rest, Token::Comment(collapse_whitespace(&c)))
        } else if '"' == ch {
            let (rest, q) = quoted_string(s).map_err(|_| {
                MalformedHeader::new(format!("unterminated quoted string: {s}"))
            })?;
            (rest, Token::Quoted(q))
        } else {
            let (rest, a) = atom(s).map_err(|_| {
                MalformedHeader::new(format!("unexpected {ch:?}"))
            })?;
            (rest, Token::Atom(a))
        };

        tokens.push(token);
        s = rest;
    }

    Ok(tokens)
}

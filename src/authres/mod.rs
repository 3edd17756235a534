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

//! `Authentication-Results` (RFC 8601) parsing, aggregation and rendering.

use std::fmt;

use thiserror::Error;

mod aggregate;
pub mod lex;
mod parse;

pub use aggregate::{aggregate, arc_override, render};
pub use parse::{parse_header, ParsedHeader, ResInfo};

/// The grammar could not make sense of a header value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed Authentication-Results: {0}")]
pub struct MalformedHeader(String);

impl MalformedHeader {
    pub fn new(what: impl Into<String>) -> Self {
        Self(what.into())
    }
}

/// Methods registered with IANA. Results for any other method are dropped.
pub const KNOWN_METHODS: &[&str] = &[
    "arc",
    "auth",
    "dkim",
    "dkim-adsp",
    "dkim-atps",
    "dmarc",
    "dnswl",
    "domainkeys",
    "iprev",
    "rrvs",
    "sender-id",
    "smime",
    "spf",
    "vbr",
];

/// Property types understood by the grammar.
pub const KNOWN_PTYPES: &[&str] = &["smtp", "header", "body", "policy", "dns"];

/// Methods for which a message may legitimately carry several results, one
/// per signature.
const REPEATABLE_METHODS: &[&str] = &["dkim"];

/// One `ptype.property=value` item of a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub ptype: String,
    pub property: String,
    pub value: String,
    /// Whether the value was given as a quoted string.
    pub quoted: bool,
    pub comment: Option<String>,
}

/// A single method result, e.g. `spf=pass smtp.mailfrom=foo@example.com`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResult {
    /// Always lower case.
    pub method: String,
    pub method_version: Option<u32>,
    /// Always lower case.
    pub result: String,
    pub comment: Option<String>,
    pub reason: Option<String>,
    pub properties: Vec<Property>,
}

impl AuthResult {
    pub fn new(method: &str, result: &str) -> Self {
        Self {
            method: method.to_ascii_lowercase(),
            method_version: None,
            result: result.to_ascii_lowercase(),
            comment: None,
            reason: None,
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        ptype: &str,
        property: &str,
        value: impl Into<String>,
        quoted: bool,
    ) -> Self {
        self.properties.push(Property {
            ptype: ptype.to_owned(),
            property: property.to_owned(),
            value: value.into(),
            quoted,
            comment: None,
        });
        self
    }

    fn repeatable(&self) -> bool {
        REPEATABLE_METHODS.contains(&self.method.as_str())
    }
}

/// The results collected from all `Authentication-Results` fields belonging
/// to one authserv-id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthResultSet {
    pub authserv_id: String,
    pub results: Vec<AuthResult>,
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.chars().any(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '(' | ')' | '"' | '\\' | ';')
        })
}

struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"")?;
        for ch in self.0.chars() {
            if matches!(ch, '"' | '\\') {
                write!(f, "\\")?;
            }
            write!(f, "{ch}")?;
        }
        write!(f, "\"")
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}=", self.ptype, self.property)?;
        if self.quoted || needs_quoting(&self.value) {
            write!(f, "{}", Quoted(&self.value))?;
        } else {
            write!(f, "{}", self.value)?;
        }
        if let Some(ref comment) = self.comment {
            write!(f, " ({comment})")?;
        }
        Ok(())
    }
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.method)?;
        if let Some(version) = self.method_version {
            write!(f, "/{version}")?;
        }
        write!(f, "={}", self.result)?;
        if let Some(ref reason) = self.reason {
            write!(f, " reason={}", Quoted(reason))?;
        }
        if let Some(ref comment) = self.comment {
            write!(f, " ({comment})")?;
        }
        for property in &self.properties {
            write!(f, " {property}")?;
        }
        Ok(())
    }
}

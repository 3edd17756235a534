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

//! Parsed forms of the three ARC header fields.

use std::fmt;
use std::ops::Range;

use chrono::prelude::*;

use super::canonicalisation::Canonicalisation;
use super::chain::ChainState;
use super::tag::{
    decode_base64, parse_instance, parse_timestamp, required, set_once,
    split_tags,
};
use crate::mime::header::{HeaderField, FWS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HashAlgorithm {
    /// Accepted on verification only (RFC 8301 forbids signing with it).
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            h => Err(format!("unknown hash algorithm: {h}")),
        }
    }

    pub fn message_digest(self) -> openssl::hash::MessageDigest {
        match self {
            Self::Sha1 => openssl::hash::MessageDigest::sha1(),
            Self::Sha256 => openssl::hash::MessageDigest::sha256(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Rsa,
}

impl SignatureAlgorithm {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "rsa" => Ok(Self::Rsa),
            s => Err(format!("unknown signature algorithm: {s}")),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Rsa => write!(f, "rsa"),
        }
    }
}

/// The `a=` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct Algorithm {
    pub signature: SignatureAlgorithm,
    pub hash: HashAlgorithm,
}

impl Algorithm {
    pub const RSA_SHA256: Self = Self {
        signature: SignatureAlgorithm::Rsa,
        hash: HashAlgorithm::Sha256,
    };

    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.to_ascii_lowercase();
        let Some((signature, hash)) = s.split_once('-') else {
            return Err(format!("couldn't parse a={s}"));
        };

        Ok(Self {
            signature: SignatureAlgorithm::parse(signature)?,
            hash: HashAlgorithm::parse(hash)?,
        })
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::RSA_SHA256
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.signature, self.hash)
    }
}

impl TryFrom<String> for Algorithm {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        Self::parse(&s)
    }
}

/// The literal text of a signed header field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawHeader {
    /// The whole field as `Name:value`, without the final line ending.
    pub text: String,
    /// The range in `text` of the `b=` value. This is what gets blanked out
    /// to produce the field's own contribution to its signature.
    pub b: Range<usize>,
}

impl RawHeader {
    /// The header text with the `b=` value removed.
    pub fn without_signature(&self) -> String {
        let mut s = String::with_capacity(self.text.len());
        s.push_str(&self.text[..self.b.start]);
        s.push_str(&self.text[self.b.end..]);
        s
    }
}

/// An `ARC-Seal` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealRecord {
    pub instance: u32,
    pub chain_validation: ChainState,
    pub algorithm: Algorithm,
    pub domain: String,
    pub selector: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub signature: Vec<u8>,
    pub raw: RawHeader,
}

impl SealRecord {
    pub fn parse(field: &HeaderField) -> Result<Self, String> {
        let text = field.line();
        let offset = field.name.len() + 1;

        let mut instance = None::<u32>;
        let mut chain_validation = None::<ChainState>;
        let mut algorithm = None::<Algorithm>;
        let mut domain = None::<String>;
        let mut selector = None::<String>;
        let mut timestamp = None::<DateTime<Utc>>;
        let mut signature = None::<(Vec<u8>, Range<usize>)>;

        for (k, v, range) in split_tags(&field.value) {
            let range = range.start + offset..range.end + offset;
            match k {
                "i" => set_once(k, &mut instance, parse_instance(v)?)?,
                "cv" => {
                    set_once(k, &mut chain_validation, ChainState::parse(v)?)?
                },
                "a" => set_once(k, &mut algorithm, Algorithm::parse(v)?)?,
                "d" => set_once(k, &mut domain, v.to_owned())?,
                "s" => set_once(k, &mut selector, v.to_owned())?,
                "t" => set_once(k, &mut timestamp, parse_timestamp(v)?)?,
                "b" => set_once(k, &mut signature, (decode_base64(v), range))?,
                // RFC 8617 § 4.1.3
                "h" => return Err("h= is not permitted in ARC-Seal".to_owned()),
                _ => {},
            }
        }

        let (signature, b) = required("b", signature)?;
        Ok(Self {
            instance: required("i", instance)?,
            chain_validation: required("cv", chain_validation)?,
            algorithm: required("a", algorithm)?,
            domain: required("d", domain)?,
            selector: required("s", selector)?,
            timestamp,
            signature,
            raw: RawHeader { text, b },
        })
    }
}

/// An `ARC-Message-Signature` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureRecord {
    pub instance: u32,
    pub algorithm: Algorithm,
    pub canonicalisation: Canonicalisation,
    pub domain: String,
    pub selector: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub expiration: Option<DateTime<Utc>>,
    pub signed_headers: Vec<String>,
    pub body_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub raw: RawHeader,
}

impl SignatureRecord {
    pub fn parse(field: &HeaderField) -> Result<Self, String> {
        let text = field.line();
        let offset = field.name.len() + 1;

        let mut instance = None::<u32>;
        let mut algorithm = None::<Algorithm>;
        let mut canonicalisation = None::<Canonicalisation>;
        let mut domain = None::<String>;
        let mut selector = None::<String>;
        let mut timestamp = None::<DateTime<Utc>>;
        let mut expiration = None::<DateTime<Utc>>;
        let mut signed_headers = None::<Vec<String>>;
        let mut body_hash = None::<Vec<u8>>;
        let mut signature = None::<(Vec<u8>, Range<usize>)>;

        for (k, v, range) in split_tags(&field.value) {
            let range = range.start + offset..range.end + offset;
            match k {
                "i" => set_once(k, &mut instance, parse_instance(v)?)?,
                "a" => set_once(k, &mut algorithm, Algorithm::parse(v)?)?,
                "c" => set_once(
                    k,
                    &mut canonicalisation,
                    Canonicalisation::parse(v)?,
                )?,
                "d" => set_once(k, &mut domain, v.to_owned())?,
                "s" => set_once(k, &mut selector, v.to_owned())?,
                "t" => set_once(k, &mut timestamp, parse_timestamp(v)?)?,
                "x" => set_once(k, &mut expiration, parse_timestamp(v)?)?,
                "h" => set_once(
                    k,
                    &mut signed_headers,
                    v.split(':')
                        .map(|s| s.trim_matches(FWS).to_owned())
                        .filter(|s| !s.is_empty())
                        .collect(),
                )?,
                "bh" => set_once(k, &mut body_hash, decode_base64(v))?,
                "b" => set_once(k, &mut signature, (decode_base64(v), range))?,
                _ => {},
            }
        }

        let signed_headers = required("h", signed_headers)?;
        // RFC 8617 § 4.1.2
        if signed_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(super::chain::SEAL_HEADER))
        {
            return Err("h= must not include ARC-Seal".to_owned());
        }

        let (signature, b) = required("b", signature)?;
        Ok(Self {
            instance: required("i", instance)?,
            algorithm: required("a", algorithm)?,
            canonicalisation: canonicalisation.unwrap_or_default(),
            domain: required("d", domain)?,
            selector: required("s", selector)?,
            timestamp,
            expiration,
            signed_headers,
            body_hash: required("bh", body_hash)?,
            signature,
            raw: RawHeader { text, b },
        })
    }
}

/// An `ARC-Authentication-Results` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResultsRecord {
    pub instance: u32,
    /// Everything after the `i=<n>;` prefix, trimmed.
    pub body: String,
    /// The whole field as `Name:value`.
    pub raw: String,
}

impl AuthResultsRecord {
    pub fn parse(field: &HeaderField) -> Result<Self, String> {
        let (prefix, body) = field
            .value
            .split_once(';')
            .ok_or("missing ; after instance tag")?;
        let Some(("i", instance)) = prefix
            .trim_matches(FWS)
            .split_once('=')
            .map(|(k, v)| (k.trim_matches(FWS), v.trim_matches(FWS)))
        else {
            return Err("does not start with i= tag".to_owned());
        };

        Ok(Self {
            instance: parse_instance(instance)?,
            body: body.trim_matches(FWS).to_owned(),
            raw: field.line(),
        })
    }
}

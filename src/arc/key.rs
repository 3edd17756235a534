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

//! Public key records, key resolution and signing keys.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use super::record::{HashAlgorithm, SignatureAlgorithm};
use super::tag::{decode_base64, required, set_once, split_tags};
use crate::mime::header::FWS;

pub type SigningKey = openssl::pkey::PKey<openssl::pkey::Private>;

/// A parsed `_domainkey` TXT record (RFC 6376 § 3.6.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxtRecord {
    /// The `h=` tag, if present. Unknown algorithms are dropped.
    pub acceptable_hash_algorithms: Option<Vec<HashAlgorithm>>,
    pub key_type: SignatureAlgorithm,
    /// The `p=` tag, decoded. Empty if the key was revoked.
    pub public_key: Vec<u8>,
}

impl TxtRecord {
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut version = None::<&str>;
        let mut acceptable_hash_algorithms = None::<Vec<HashAlgorithm>>;
        let mut key_type = None::<SignatureAlgorithm>;
        let mut public_key = None::<Vec<u8>>;

        for (k, v, _) in split_tags(s) {
            match k {
                "v" => set_once(k, &mut version, v)?,
                "h" => {
                    let mut algorithms = v
                        .split(':')
                        .filter_map(|s| {
                            HashAlgorithm::parse(s.trim_matches(FWS)).ok()
                        })
                        .collect::<Vec<_>>();
                    algorithms.sort_unstable();
                    algorithms.dedup();
                    set_once(k, &mut acceptable_hash_algorithms, algorithms)?;
                },
                "k" => {
                    set_once(k, &mut key_type, SignatureAlgorithm::parse(v)?)?
                },
                "p" => set_once(k, &mut public_key, decode_base64(v))?,
                _ => {},
            }
        }

        if let Some(version) = version {
            if "DKIM1" != version {
                return Err(format!("unsupported key record version {version}"));
            }
        }

        Ok(Self {
            acceptable_hash_algorithms,
            key_type: key_type.unwrap_or(SignatureAlgorithm::Rsa),
            public_key: required("p", public_key)?,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyLookupError {
    #[error("no key record found")]
    NotFound,
    #[error("key lookup failed: {0}")]
    Unavailable(String),
}

/// Retrieves the TXT record for `selector._domainkey.domain`.
pub trait KeyResolver {
    fn resolve(
        &self,
        domain: &str,
        selector: &str,
    ) -> Result<String, KeyLookupError>;
}

/// Key records loaded from a file instead of DNS.
///
/// Each non-blank line not starting with `#` is a record name followed by
/// whitespace and the TXT record text, e.g.
/// `sel._domainkey.example.com v=DKIM1; k=rsa; p=MIGf...`.
#[derive(Clone, Debug, Default)]
pub struct KeyTable {
    records: HashMap<String, String>,
}

impl KeyTable {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut table = Self::default();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim_matches(FWS);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((name, record)) = line.split_once(char::is_whitespace)
            else {
                return Err(format!("line {}: no record text", line_no + 1));
            };
            let Some((selector, domain)) = name.split_once("._domainkey.")
            else {
                return Err(format!(
                    "line {}: {name} is not a _domainkey name",
                    line_no + 1,
                ));
            };

            table.insert(domain, selector, record.trim_matches(FWS));
        }

        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        Self::parse(&text).map_err(|e| format!("{}: {e}", path.display()))
    }

    pub fn insert(&mut self, domain: &str, selector: &str, record: &str) {
        self.records
            .insert(Self::key(domain, selector), record.to_owned());
    }

    fn key(domain: &str, selector: &str) -> String {
        format!(
            "{}._domainkey.{}",
            selector.to_lowercase(),
            domain.trim_end_matches('.').to_lowercase(),
        )
    }
}

impl KeyResolver for KeyTable {
    fn resolve(
        &self,
        domain: &str,
        selector: &str,
    ) -> Result<String, KeyLookupError> {
        self.records
            .get(&Self::key(domain, selector))
            .cloned()
            .ok_or(KeyLookupError::NotFound)
    }
}

/// Loads a private key in PEM or DER form.
pub fn load_private_key(path: &Path) -> Result<SigningKey, String> {
    let data =
        fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;

    let key = SigningKey::private_key_from_pem(&data)
        .or_else(|_| SigningKey::private_key_from_der(&data))
        .map_err(|e| {
            format!("{}: not a usable private key: {e}", path.display())
        })?;

    if openssl::pkey::Id::RSA != key.id() {
        return Err(format!("{}: not an RSA key", path.display()));
    }

    Ok(key)
}

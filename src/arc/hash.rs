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

//! Construction of the hash inputs for message signatures and seals.

use std::io::{self, Write};
use std::mem;

use super::canonicalisation::{
    BodyCanonicalisation, BodyCanonicaliser, HeaderCanonicalisation,
};
use super::error::Error;
use super::record::{HashAlgorithm, RawHeader};
use crate::mime::header::HeaderField;

/// Generates the data signed by an `ARC-Message-Signature`.
///
/// `signed_names` is the `h=` list. Each occurrence of a name selects the
/// next instance of that header counting from the bottom of the header
/// block; names which run out of instances contribute nothing. The
/// signature header itself comes last, with its `b=` value removed and no
/// trailing CRLF.
pub fn signed_header_data(
    canonicalisation: HeaderCanonicalisation,
    signed_names: &[String],
    headers: &[HeaderField],
    own: &RawHeader,
) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(256 * (signed_names.len() + 1));
    let mut resolved: Vec<Option<&HeaderField>> =
        vec![None; signed_names.len()];

    // Walking top-down, each matching header displaces the previous match
    // into the next occurrence of the same name, so that afterwards the
    // first occurrence holds the bottom-most header, the second the one
    // above it, and so on.
    for field in headers {
        let mut carry = Some(field);
        for (slot, name) in resolved.iter_mut().zip(signed_names) {
            if carry.is_none() {
                break;
            }
            if field.is(name) {
                mem::swap(&mut carry, slot);
            }
        }
    }

    for field in resolved.into_iter().flatten() {
        let line = canonicalisation.canonicalise(&field.line());
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(
        canonicalisation
            .canonicalise(&own.without_signature())
            .as_bytes(),
    );
    out
}

/// Generates the data signed by an `ARC-Seal`.
///
/// `prior` holds the complete text of all earlier ARC headers, in the
/// order AAR, AMS, AS for instance 1, then instance 2, and so on, followed
/// by this instance's AAR and AMS. `own` is the seal being signed.
pub fn seal_data(prior: &[&str], own: &RawHeader) -> Vec<u8> {
    let mut out = Vec::<u8>::new();
    for text in prior {
        out.extend_from_slice(
            HeaderCanonicalisation::Relaxed.canonicalise(text).as_bytes(),
        );
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(
        HeaderCanonicalisation::Relaxed
            .canonicalise(&own.without_signature())
            .as_bytes(),
    );
    out
}

/// Computes the hash of the message body.
pub struct BodyHasher {
    inner: BodyCanonicaliser<DigestWriter>,
}

impl BodyHasher {
    pub fn new(
        canonicalisation: BodyCanonicalisation,
        hash: HashAlgorithm,
    ) -> Self {
        Self {
            inner: BodyCanonicaliser::new(
                DigestWriter {
                    digest: openssl::hash::Hasher::new(hash.message_digest()),
                },
                canonicalisation,
            ),
        }
    }

    pub fn finish(self) -> Result<Vec<u8>, Error> {
        let writer = self.inner.finish()?;
        Ok(writer.digest.and_then(|mut h| h.finish())?.to_vec())
    }
}

impl Write for BodyHasher {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.inner.write(src)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Adapts an OpenSSL hasher to `Write`. Writes always succeed; an OpenSSL
/// error is kept and reported by `BodyHasher::finish`.
struct DigestWriter {
    digest: Result<openssl::hash::Hasher, openssl::error::ErrorStack>,
}

impl Write for DigestWriter {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if let Ok(ref mut digest) = self.digest {
            if let Err(e) = digest.update(src) {
                self.digest = Err(e);
            }
        }

        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

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

//! Keys, messages and a one-hop driver shared by the tests.

use std::io::Write;

use chrono::prelude::*;
use lazy_static::lazy_static;

use super::hash::BodyHasher;
use super::*;
use crate::mime::header::HeaderField;

pub struct TestKeys {
    pub rsa1024: SigningKey,
    pub rsa512: SigningKey,
    /// Records for the selectors `big` (rsa1024), `small` (rsa512),
    /// `revoked` and `sha1only` under each test domain.
    pub table: KeyTable,
}

lazy_static! {
    pub static ref TEST_KEYS: TestKeys = TestKeys::new();
}

pub const TEST_DOMAINS: &[&str] = &[
    "example.org",
    "example.net",
    "example.com",
    "b\u{00fc}cher.example",
];

impl TestKeys {
    fn new() -> Self {
        let rsa1024 = openssl::rsa::Rsa::generate(1024).unwrap();
        let big = base64::encode(rsa1024.public_key_to_der().unwrap());
        let rsa1024 = openssl::pkey::PKey::from_rsa(rsa1024).unwrap();

        let rsa512 = openssl::rsa::Rsa::generate(512).unwrap();
        let small = base64::encode(rsa512.public_key_to_der().unwrap());
        let rsa512 = openssl::pkey::PKey::from_rsa(rsa512).unwrap();

        let mut table = KeyTable::default();
        for domain in TEST_DOMAINS {
            let records = [
                ("big", format!("v=DKIM1; k=rsa; p={big}")),
                ("s\u{00e9}l", format!("v=DKIM1; p={big}")),
                ("small", format!("v=DKIM1; k=rsa; p={small}")),
                ("revoked", "v=DKIM1; k=rsa; p=".to_owned()),
                ("sha1only", format!("v=DKIM1; h=sha1; p={big}")),
            ];
            for (selector, record) in records {
                table.insert(domain, selector, &record);
            }
        }

        Self {
            rsa1024,
            rsa512,
            table,
        }
    }
}

pub const MESSAGE_HEADERS: &[u8] = b"\
Received: from mail.example.net by mx.example.org\r
\tfor <bob@example.org>; Fri, 14 Jul 2017 02:40:00 +0000\r
From: Alice <alice@example.net>\r
To: Bob <bob@example.org>\r
Subject: Greetings\r
Date: Fri, 14 Jul 2017 02:39:00 +0000\r
Message-ID: <1234@example.net>\r
";

pub const MESSAGE_BODY: &[u8] = b"Hello world\r\n\r\nGoodbye  world \r\n\r\n";

pub fn test_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_500_000_000, 0).unwrap()
}

pub fn test_policy(domain: &str, selector: &str) -> SealPolicy {
    SealPolicy {
        authserv_id: domain.to_owned(),
        domain: domain.to_owned(),
        selector: selector.to_owned(),
        algorithm: Algorithm::RSA_SHA256,
        canonicalisation: Canonicalisation::RELAXED,
        sign_headers: DEFAULT_SIGN_HEADERS
            .iter()
            .map(|&s| s.to_owned())
            .collect(),
        oversign_headers: vec!["From".to_owned()],
        signature_ttl: None,
    }
}

pub struct HopOptions<'a> {
    pub domain: &'a str,
    pub selector: &'a str,
    pub key: &'a SigningKey,
    pub now: DateTime<Utc>,
    pub ttl: Option<chrono::Duration>,
    /// Replaces the validated state before sealing.
    pub force_state: Option<ChainState>,
}

pub fn hop_opts() -> HopOptions<'static> {
    HopOptions {
        domain: "example.org",
        selector: "big",
        key: &TEST_KEYS.rsa1024,
        now: test_now(),
        ttl: None,
        force_state: None,
    }
}

/// Validates and seals `headers` and `body` the way one ARC-aware relay
/// would, returning the header block with the new set prepended.
pub fn add_hop(
    headers: &[HeaderField],
    body: &[u8],
    opts: &HopOptions<'_>,
) -> Vec<HeaderField> {
    let mut validator = Validator::new(headers);
    validator.write_all(body).unwrap();
    let (mut validation, chain) = validator.finish(
        headers,
        &VerificationEnvironment {
            now: opts.now,
            keys: &TEST_KEYS.table,
            minimum_key_bits: 512,
        },
    );
    if let Some(state) = opts.force_state {
        validation.state = state;
    }

    let policy = SealPolicy {
        signature_ttl: opts.ttl,
        ..test_policy(opts.domain, opts.selector)
    };
    let mut hasher =
        BodyHasher::new(policy.canonicalisation.body, policy.algorithm.hash);
    hasher.write_all(body).unwrap();
    let body_hash = hasher.finish().unwrap();

    let results = format!("arc={}", validation.state.keyword());
    let set = seal(
        &policy,
        opts.key,
        &SealInput {
            validation: &validation,
            chain: &chain,
            results: &results,
            headers,
            body_hash: &body_hash,
            now: opts.now,
        },
    )
    .unwrap();
    assert!(!set.is_empty(), "chain could not be extended");

    prepend(&set, headers)
}

/// Prepends `new` (in prepend order) to `headers` the way a mail server
/// writes them out and a later hop reads them back.
pub fn prepend(
    new: &[HeaderField],
    headers: &[HeaderField],
) -> Vec<HeaderField> {
    let mut out = new
        .iter()
        .map(|h| {
            HeaderField::new(
                h.name.clone(),
                format!(" {}", h.value.replace('\n', "\r\n")),
            )
        })
        .collect::<Vec<_>>();
    out.reverse();
    out.extend_from_slice(headers);
    out
}

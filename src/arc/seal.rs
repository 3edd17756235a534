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

//! Construction of a new ARC set (RFC 8617 § 5.1).

use std::ops::Range;

use chrono::prelude::*;

use super::canonicalisation::Canonicalisation;
use super::chain::{
    ArcInstance, ChainState, AUTH_RESULTS_HEADER, SEAL_HEADER,
    SIGNATURE_HEADER,
};
use super::error::Error;
use super::hash::{seal_data, signed_header_data};
use super::key::SigningKey;
use super::record::{Algorithm, RawHeader};
use super::validate::ChainValidation;
use crate::mime::header::{fix_crlf_str, HeaderField};

/// Lines are folded before they would grow beyond this many columns.
const FOLD_WIDTH: usize = 78;
const FOLD: &str = "\r\n\t";

/// The headers signed by default, as recommended by RFC 6376 § 5.4.1.
pub const DEFAULT_SIGN_HEADERS: &[&str] = &[
    "From",
    "Reply-To",
    "Subject",
    "Date",
    "To",
    "Cc",
    "Resent-Date",
    "Resent-From",
    "Resent-To",
    "Resent-Cc",
    "In-Reply-To",
    "References",
    "List-Id",
    "List-Help",
    "List-Unsubscribe",
    "List-Subscribe",
    "List-Post",
    "List-Owner",
    "List-Archive",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
];

/// Headers which are never covered by an `ARC-Message-Signature`.
const NEVER_SIGNED: &[&str] = &[
    AUTH_RESULTS_HEADER,
    SIGNATURE_HEADER,
    SEAL_HEADER,
    "Authentication-Results",
];

/// How this host seals messages.
#[derive(Clone, Debug)]
pub struct SealPolicy {
    pub authserv_id: String,
    pub domain: String,
    pub selector: String,
    pub algorithm: Algorithm,
    pub canonicalisation: Canonicalisation,
    pub sign_headers: Vec<String>,
    /// Headers signed once more than they occur, so that none can be added
    /// without breaking the signature.
    pub oversign_headers: Vec<String>,
    pub signature_ttl: Option<chrono::Duration>,
}

pub struct SealInput<'a> {
    /// The validation of the existing chain, after any override.
    pub validation: &'a ChainValidation,
    /// The existing chain, newest first.
    pub chain: &'a [ArcInstance],
    /// The rendered results for the new `ARC-Authentication-Results`,
    /// i.e. everything after the authserv-id.
    pub results: &'a str,
    /// The message header block, top-down.
    pub headers: &'a [HeaderField],
    /// The message body hash under `policy.canonicalisation`.
    pub body_hash: &'a [u8],
    pub now: DateTime<Utc>,
}

/// Builds and signs a new ARC set.
///
/// The headers are returned in the order they must be prepended to the
/// message: `ARC-Authentication-Results`, `ARC-Message-Signature`,
/// `ARC-Seal`. Nothing is returned if the chain cannot be extended.
pub fn seal(
    policy: &SealPolicy,
    key: &SigningKey,
    input: &SealInput<'_>,
) -> Result<Vec<HeaderField>, Error> {
    if !input.validation.can_extend() {
        return Ok(Vec::new());
    }

    let instance = input.validation.instances + 1;
    let cv = match (input.validation.state, instance) {
        (ChainState::Fail, _) => ChainState::Fail,
        (_, 1) => ChainState::None,
        _ => ChainState::Pass,
    };

    let aar_value = format!(
        "i={instance}; {}; {}",
        policy.authserv_id,
        fix_crlf_str(input.results),
    );
    let aar_text = format!("{AUTH_RESULTS_HEADER}: {aar_value}");

    let signed_names = select_signed_headers(policy, input.headers);
    let timestamp = input.now.timestamp();

    let mut ams = TagList::new(SIGNATURE_HEADER);
    ams.push("i", &instance.to_string());
    ams.push("a", &policy.algorithm.to_string());
    ams.push("d", &policy.domain);
    ams.push("s", &policy.selector);
    ams.push("t", &timestamp.to_string());
    ams.push("c", &policy.canonicalisation.to_string());
    if let Some(ttl) = policy.signature_ttl {
        ams.push("x", &(timestamp + ttl.num_seconds()).to_string());
    }
    ams.push("bh", &base64::encode(input.body_hash));
    ams.push_list("h", &signed_names);
    let (ams_unsigned, ams_b) = ams.unsigned();
    let ams_data = signed_header_data(
        policy.canonicalisation.header,
        &signed_names,
        input.headers,
        &RawHeader {
            text: format!("{SIGNATURE_HEADER}: {ams_unsigned}"),
            b: shift(ams_b, SIGNATURE_HEADER.len() + 2),
        },
    );
    let ams_value = ams.sign(policy, key, &ams_data)?;
    let ams_text = format!("{SIGNATURE_HEADER}: {ams_value}");

    let mut seal = TagList::new(SEAL_HEADER);
    seal.push("i", &instance.to_string());
    seal.push("a", &policy.algorithm.to_string());
    seal.push("d", &policy.domain);
    seal.push("s", &policy.selector);
    seal.push("t", &timestamp.to_string());
    seal.push("cv", cv.keyword());
    let (seal_unsigned, seal_b) = seal.unsigned();

    let mut prior = Vec::<&str>::new();
    // A failed chain is sealed over the new set only.
    if ChainState::Fail != cv {
        for set in input.chain.iter().rev() {
            prior.push(&set.auth_results.raw);
            prior.push(&set.signature.raw.text);
            prior.push(&set.seal.raw.text);
        }
    }
    prior.push(&aar_text);
    prior.push(&ams_text);
    let seal_input = seal_data(
        &prior,
        &RawHeader {
            text: format!("{SEAL_HEADER}: {seal_unsigned}"),
            b: shift(seal_b, SEAL_HEADER.len() + 2),
        },
    );
    let seal_value = seal.sign(policy, key, &seal_input)?;

    Ok(vec![
        output_field(AUTH_RESULTS_HEADER, &aar_value),
        output_field(SIGNATURE_HEADER, &ams_value),
        output_field(SEAL_HEADER, &seal_value),
    ])
}

/// Chooses the `h=` list for a new `ARC-Message-Signature`.
///
/// Each configured name is listed once per occurrence in the message, and
/// oversigned names once more.
pub fn select_signed_headers(
    policy: &SealPolicy,
    headers: &[HeaderField],
) -> Vec<String> {
    let signable = |name: &&String| {
        !NEVER_SIGNED.iter().any(|n| n.eq_ignore_ascii_case(name))
    };

    let mut names = Vec::<String>::new();
    for name in policy.sign_headers.iter().filter(signable) {
        let count = headers.iter().filter(|h| h.is(name)).count();
        names.extend(std::iter::repeat(name.clone()).take(count));
    }
    for name in policy.oversign_headers.iter().filter(signable) {
        names.push(name.clone());
    }

    names
}

/// Headers are signed with CRLF folding, but handed back to the mail
/// server with bare LF and without the space after the colon.
fn output_field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name, value.replace('\r', ""))
}

fn shift(range: Range<usize>, by: usize) -> Range<usize> {
    range.start + by..range.end + by
}

/// Accumulates a tag list, folding it to keep lines short.
struct TagList {
    text: String,
    column: usize,
}

impl TagList {
    fn new(header_name: &str) -> Self {
        Self {
            text: String::new(),
            column: header_name.len() + 2,
        }
    }

    fn separate(&mut self, next_len: usize) {
        if self.text.is_empty() {
            return;
        }

        // Leave room for the separator after the next item too.
        self.text.push(';');
        self.column += 1;
        if self.column + 1 + next_len + 1 > FOLD_WIDTH {
            self.text.push_str(FOLD);
            self.column = 1;
        } else {
            self.text.push(' ');
            self.column += 1;
        }
    }

    fn push(&mut self, tag: &str, value: &str) {
        let item = format!("{tag}={value}");
        self.separate(item.len());
        self.text.push_str(&item);
        self.column += item.len();
    }

    /// Pushes a colon-separated list, folding between items as needed.
    fn push_list(&mut self, tag: &str, items: &[String]) {
        let first = items.first().map_or(0, String::len);
        self.separate(tag.len() + 1 + first);
        self.text.push_str(tag);
        self.text.push('=');
        self.column += tag.len() + 1;

        for (ix, item) in items.iter().enumerate() {
            if 0 != ix {
                self.text.push(':');
                self.column += 1;
                if self.column + item.len() + 1 > FOLD_WIDTH {
                    self.text.push_str(FOLD);
                    self.column = 1;
                }
            }
            self.text.push_str(item);
            self.column += item.len();
        }
    }

    /// The text with an empty `b=` tag on its own line, and the (empty)
    /// range of the `b=` value.
    fn unsigned(&self) -> (String, Range<usize>) {
        let text = format!("{};{FOLD}b=", self.text);
        let end = text.len();
        (text, end..end)
    }

    fn sign(
        &self,
        policy: &SealPolicy,
        key: &SigningKey,
        data: &[u8],
    ) -> Result<String, Error> {
        let mut signer = openssl::sign::Signer::new(
            policy.algorithm.hash.message_digest(),
            key,
        )?;
        let signature = base64::encode(signer.sign_oneshot_to_vec(data)?);

        let (mut text, _) = self.unsigned();
        // The line starts with "\tb=".
        let mut column = 3;
        for ch in signature.chars() {
            if column >= FOLD_WIDTH {
                text.push_str(FOLD);
                column = 1;
            }
            text.push(ch);
            column += 1;
        }

        Ok(text)
    }
}

#[cfg(test)]
mod test {
    use super::super::record::{SealRecord, SignatureRecord};
    use super::super::test_keys::*;
    use super::*;
    use crate::mime::header::parse_header_block;

    fn sealed(
        validation: &ChainValidation,
        headers: &[HeaderField],
    ) -> Vec<HeaderField> {
        seal(
            &test_policy("example.org", "big"),
            &TEST_KEYS.rsa1024,
            &SealInput {
                validation,
                chain: &[],
                results: "spf=pass smtp.mailfrom=foo@example.net;\n\t\
                          arc=none smtp.remote-ip=127.0.0.1",
                headers,
                body_hash: b"hash",
                now: test_now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn first_instance() {
        let headers = parse_header_block(MESSAGE_HEADERS);
        let set = sealed(&ChainValidation::default(), &headers);

        assert_eq!(3, set.len());
        assert_eq!(AUTH_RESULTS_HEADER, set[0].name);
        assert_eq!(
            "i=1; example.org; spf=pass smtp.mailfrom=foo@example.net;\n\t\
             arc=none smtp.remote-ip=127.0.0.1",
            set[0].value,
        );

        assert_eq!(SIGNATURE_HEADER, set[1].name);
        assert!(set[1].value.starts_with(
            "i=1; a=rsa-sha256; d=example.org; s=big; t=1500000000;"
        ));
        assert!(!set[1].value.contains('\r'));
        for (ix, line) in set[1].value.split('\n').enumerate() {
            let prefix = if 0 == ix { SIGNATURE_HEADER.len() + 2 } else { 0 };
            assert!(prefix + line.len() <= FOLD_WIDTH, "too long: {line:?}");
        }

        let ams = SignatureRecord::parse(&HeaderField::new(
            SIGNATURE_HEADER,
            set[1].value.replace('\n', "\r\n"),
        ))
        .unwrap();
        assert_eq!(b"hash".to_vec(), ams.body_hash);
        assert_eq!(
            vec!["From", "Subject", "Date", "To", "Message-ID", "From"],
            ams.signed_headers,
        );
        assert_eq!(Canonicalisation::RELAXED, ams.canonicalisation);
        assert_eq!(None, ams.expiration);

        let seal = SealRecord::parse(&HeaderField::new(
            SEAL_HEADER,
            set[2].value.replace('\n', "\r\n"),
        ))
        .unwrap();
        assert_eq!(1, seal.instance);
        assert_eq!(ChainState::None, seal.chain_validation);
        assert_eq!(128, seal.signature.len());
        assert!(set[2].value.contains("\n\tb="));
    }

    #[test]
    fn failed_chain_is_sealed_with_cv_fail() {
        let headers = parse_header_block(MESSAGE_HEADERS);
        let validation = ChainValidation {
            state: ChainState::Fail,
            instances: 1,
            ..ChainValidation::default()
        };
        let set = sealed(&validation, &headers);
        assert!(set[0].value.starts_with("i=2; "));
        assert!(set[2].value.contains("cv=fail"));
    }

    #[test]
    fn no_set_for_dead_chains() {
        let headers = parse_header_block(MESSAGE_HEADERS);
        for validation in [
            ChainValidation {
                state: ChainState::Invalid,
                ..ChainValidation::default()
            },
            ChainValidation {
                state: ChainState::Fail,
                instances: 2,
                terminal: true,
                ..ChainValidation::default()
            },
            ChainValidation {
                state: ChainState::Pass,
                instances: 50,
                ..ChainValidation::default()
            },
        ] {
            assert!(sealed(&validation, &headers).is_empty());
        }
    }

    #[test]
    fn signed_header_selection() {
        let headers = vec![
            HeaderField::new("Received", " x"),
            HeaderField::new("To", " a@b.c"),
            HeaderField::new("To", " d@e.f"),
            HeaderField::new("ARC-Seal", " i=1"),
            HeaderField::new("From", " g@h.i"),
        ];
        let policy = SealPolicy {
            sign_headers: vec![
                "to".to_owned(),
                "from".to_owned(),
                "ARC-Seal".to_owned(),
            ],
            oversign_headers: vec![
                "from".to_owned(),
                "authentication-results".to_owned(),
            ],
            ..test_policy("example.org", "big")
        };
        assert_eq!(
            vec!["to", "to", "from", "from"],
            select_signed_headers(&policy, &headers),
        );
    }

    #[test]
    fn tag_list_folding() {
        let mut tags = TagList::new("ARC-Seal");
        tags.push("i", "1");
        tags.push("d", &"x".repeat(70));
        let names =
            (0..20).map(|i| format!("Header-{i}")).collect::<Vec<_>>();
        tags.push_list("h", &names);

        let (text, b) = tags.unsigned();
        assert!(text.starts_with("i=1;\r\n\td=xxx"));
        assert!(text.ends_with(";\r\n\tb="));
        assert_eq!(text.len()..text.len(), b);
        for (ix, line) in text.split("\r\n").enumerate() {
            let width = line.len() + if 0 == ix { 10 } else { 0 };
            assert!(width <= FOLD_WIDTH, "line too long: {line:?}");
        }
    }
}

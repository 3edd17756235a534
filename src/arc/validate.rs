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

//! Verification of an existing ARC chain (RFC 8617 § 5.2).

use std::io::{self, Write};

use chrono::prelude::*;
use log::{debug, info, warn};

use super::canonicalisation::BodyCanonicalisation;
use super::chain::{collect_instances, ArcInstance, ChainState, MAX_INSTANCES};
use super::error::{Failure, StructuralError};
use super::hash::{seal_data, signed_header_data, BodyHasher};
use super::key::{KeyResolver, TxtRecord};
use super::record::HashAlgorithm;
use crate::mime::header::HeaderField;

const MAX_RSA_BITS: u32 = 8192;

pub type PublicKey = openssl::pkey::PKey<openssl::pkey::Public>;

/// Environmental information passed in to the validator.
#[derive(Clone, Copy)]
pub struct VerificationEnvironment<'a> {
    pub now: DateTime<Utc>,
    pub keys: &'a dyn KeyResolver,
    /// Keys with fewer bits fail verification.
    pub minimum_key_bits: u32,
}

/// The outcome of validating a chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainValidation {
    pub state: ChainState,
    /// The lowest instance from which all message signatures up to the
    /// newest still verify, or 0 if they all do. `None` when unknown.
    pub oldest_pass: Option<u32>,
    /// The signing domain of each instance, newest first.
    pub domains: Vec<String>,
    /// The number of instances in the chain.
    pub instances: u32,
    /// Set if the chain can never be extended, because it already carried a
    /// failure or reached the instance limit.
    pub terminal: bool,
    pub failures: Vec<Failure>,
}

impl ChainValidation {
    /// Applies a chain state reported by a trusted `Authentication-Results`
    /// header.
    ///
    /// Returns whether the report was accepted. Failed, invalid and
    /// terminal chains cannot be overridden.
    pub fn apply_override(&mut self, reported: ChainState) -> bool {
        if self.terminal
            || matches!(self.state, ChainState::Fail | ChainState::Invalid)
        {
            return false;
        }

        let reported = if ChainState::None == reported && self.instances > 0 {
            ChainState::Pass
        } else {
            reported
        };

        if reported != self.state {
            self.state = reported;
            self.oldest_pass = None;
        }

        true
    }

    /// Whether a new instance may be added to this chain.
    pub fn can_extend(&self) -> bool {
        !self.terminal
            && ChainState::Invalid != self.state
            && self.instances < MAX_INSTANCES
    }

    fn fail(&mut self, failure: Failure) {
        info!("ARC validation failed: {failure}");
        self.state = ChainState::Fail;
        self.oldest_pass = None;
        self.failures.push(failure);
    }
}

/// Validates the ARC chain of an inbound message.
///
/// The body is fed in through the `Write` implementation, after which
/// `finish` performs the actual verification.
pub struct Validator {
    chain: Result<Vec<ArcInstance>, StructuralError>,
    hashers: Vec<((BodyCanonicalisation, HashAlgorithm), BodyHasher)>,
}

impl Validator {
    pub fn new(headers: &[HeaderField]) -> Self {
        let chain = collect_instances(headers);
        let mut hashers =
            Vec::<((BodyCanonicalisation, HashAlgorithm), BodyHasher)>::new();
        if let Ok(ref chain) = chain {
            for instance in chain {
                let key = (
                    instance.signature.canonicalisation.body,
                    instance.signature.algorithm.hash,
                );
                if !hashers.iter().any(|&(k, _)| k == key) {
                    hashers.push((key, BodyHasher::new(key.0, key.1)));
                }
            }
        }

        Self { chain, hashers }
    }

    /// Completes validation.
    ///
    /// `headers` must be the same header block passed to `new`. Returns the
    /// validation along with the parsed chain, newest first; the chain is
    /// empty if it could not be parsed.
    pub fn finish(
        self,
        headers: &[HeaderField],
        env: &VerificationEnvironment<'_>,
    ) -> (ChainValidation, Vec<ArcInstance>) {
        let mut validation = ChainValidation::default();

        let chain = match self.chain {
            Ok(chain) => chain,
            Err(StructuralError::TooManyInstances(n)) => {
                warn!("ARC chain has {n} instances, beyond the limit");
                validation.state = ChainState::Fail;
                validation.instances = n;
                validation.terminal = true;
                return (validation, Vec::new());
            },
            Err(e) => {
                warn!("Invalid ARC chain: {e}");
                validation.state = ChainState::Invalid;
                return (validation, Vec::new());
            },
        };

        if chain.is_empty() {
            return (validation, chain);
        }

        validation.instances = chain.len() as u32;
        validation.domains =
            chain.iter().map(|i| i.signature.domain.clone()).collect();

        let mut body_hashes = Vec::with_capacity(self.hashers.len());
        for (key, hasher) in self.hashers {
            match hasher.finish() {
                Ok(hash) => body_hashes.push((key, hash)),
                Err(e) => {
                    validation.fail(Failure::Internal(e.to_string()));
                    return (validation, chain);
                },
            }
        }

        // A chain which arrived failed (or was never sealed correctly) is
        // dead for good.
        for instance in &chain {
            let expected = if 1 == instance.number {
                ChainState::None
            } else {
                ChainState::Pass
            };
            if instance.seal.chain_validation != expected {
                validation.fail(Failure::UnexpectedChainValidation {
                    instance: instance.number,
                    found: instance.seal.chain_validation,
                    expected,
                });
                validation.terminal = true;
                return (validation, chain);
            }
        }

        if let Err(failure) =
            verify_signature(&chain[0], headers, &body_hashes, env)
        {
            validation.fail(failure);
            return (validation, chain);
        }

        for ix in 0..chain.len() {
            if let Err(failure) = verify_seal(&chain[ix..], env) {
                validation.fail(failure);
                return (validation, chain);
            }
        }

        let mut oldest_pass = 0;
        for instance in &chain[1..] {
            if let Err(failure) =
                verify_signature(instance, headers, &body_hashes, env)
            {
                debug!(
                    "Older ARC-Message-Signature no longer verifies: {failure}"
                );
                oldest_pass = instance.number + 1;
                break;
            }
        }

        validation.state = ChainState::Pass;
        validation.oldest_pass = Some(oldest_pass);
        (validation, chain)
    }
}

impl Write for Validator {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        for (_, hasher) in &mut self.hashers {
            hasher.write_all(src)?;
        }

        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Looks up and checks the public key for `selector._domainkey.domain`.
fn fetch_key(
    env: &VerificationEnvironment<'_>,
    domain: &str,
    selector: &str,
    hash: HashAlgorithm,
) -> Result<PublicKey, Failure> {
    let location = format!("{selector}._domainkey.{domain}");

    let txt = env
        .keys
        .resolve(domain, selector)
        .map_err(|e| Failure::KeyUnavailable(location.clone(), e.to_string()))?;
    let record = TxtRecord::parse(&txt)
        .map_err(|e| Failure::KeyUnavailable(location.clone(), e))?;

    if record
        .acceptable_hash_algorithms
        .as_ref()
        .is_some_and(|aha| !aha.contains(&hash))
    {
        return Err(Failure::UnacceptableHashAlgorithm(location, hash));
    }

    if record.public_key.is_empty() {
        return Err(Failure::PublicKeyRevoked(location));
    }

    let key = openssl::rsa::Rsa::public_key_from_der(&record.public_key)
        .and_then(openssl::pkey::PKey::from_rsa)
        .map_err(|_| Failure::InvalidPublicKey(location.clone()))?;

    let bits = key.bits();
    if bits > MAX_RSA_BITS {
        return Err(Failure::KeyTooLarge(location));
    }
    if bits < env.minimum_key_bits {
        return Err(Failure::KeyTooShort {
            location,
            bits,
            minimum: env.minimum_key_bits,
        });
    }

    Ok(key)
}

fn check_signature(
    key: &PublicKey,
    hash: HashAlgorithm,
    signature: &[u8],
    data: &[u8],
) -> Result<bool, Failure> {
    let mut verifier =
        openssl::sign::Verifier::new(hash.message_digest(), key)
            .map_err(|e| Failure::Internal(e.to_string()))?;
    // OpenSSL reports some malformed signatures as errors rather than as a
    // mismatch.
    Ok(verifier.verify_oneshot(signature, data).unwrap_or(false))
}

/// Verifies the `ARC-Message-Signature` of `instance` against the message.
fn verify_signature(
    instance: &ArcInstance,
    headers: &[HeaderField],
    body_hashes: &[((BodyCanonicalisation, HashAlgorithm), Vec<u8>)],
    env: &VerificationEnvironment<'_>,
) -> Result<(), Failure> {
    let sig = &instance.signature;

    let body_key = (sig.canonicalisation.body, sig.algorithm.hash);
    let body_hash = body_hashes
        .iter()
        .find(|&&(k, _)| k == body_key)
        .map(|(_, hash)| hash)
        .ok_or_else(|| Failure::Internal("body hash not computed".to_owned()))?;
    if *body_hash != sig.body_hash {
        return Err(Failure::BodyHashMismatch(instance.number));
    }

    let key = fetch_key(env, &sig.domain, &sig.selector, sig.algorithm.hash)?;
    let data = signed_header_data(
        sig.canonicalisation.header,
        &sig.signed_headers,
        headers,
        &sig.raw,
    );
    if !check_signature(&key, sig.algorithm.hash, &sig.signature, &data)? {
        return Err(Failure::SignatureMismatch(instance.number));
    }

    if sig.expiration.is_some_and(|x| x < env.now) {
        return Err(Failure::ExpiredSignature(instance.number));
    }

    Ok(())
}

/// Verifies the seal of `chain[0]`, which covers every set in `chain`.
fn verify_seal(
    chain: &[ArcInstance],
    env: &VerificationEnvironment<'_>,
) -> Result<(), Failure> {
    let newest = &chain[0];
    let seal = &newest.seal;

    let mut prior = Vec::<&str>::with_capacity(3 * chain.len());
    for instance in chain[1..].iter().rev() {
        prior.push(&instance.auth_results.raw);
        prior.push(&instance.signature.raw.text);
        prior.push(&instance.seal.raw.text);
    }
    prior.push(&newest.auth_results.raw);
    prior.push(&newest.signature.raw.text);

    let key =
        fetch_key(env, &seal.domain, &seal.selector, seal.algorithm.hash)?;
    let data = seal_data(&prior, &seal.raw);
    if !check_signature(&key, seal.algorithm.hash, &seal.signature, &data)? {
        return Err(Failure::SealMismatch(newest.number));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::test_keys::*;
    use super::*;
    use crate::mime::header::parse_header_block;

    fn validate(
        headers: &[HeaderField],
        body: &[u8],
        minimum_key_bits: u32,
    ) -> ChainValidation {
        let mut validator = Validator::new(headers);
        validator.write_all(body).unwrap();
        validator
            .finish(
                headers,
                &VerificationEnvironment {
                    now: test_now(),
                    keys: &TEST_KEYS.table,
                    minimum_key_bits,
                },
            )
            .0
    }

    fn message_headers() -> Vec<HeaderField> {
        parse_header_block(MESSAGE_HEADERS)
    }

    #[test]
    fn no_chain() {
        crate::init_test_log();
        let validation = validate(&message_headers(), MESSAGE_BODY, 1024);
        assert_eq!(ChainValidation::default(), validation);
    }

    #[test]
    fn single_hop_passes() {
        crate::init_test_log();
        let headers = add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Pass, validation.state);
        assert_eq!(Some(0), validation.oldest_pass);
        assert_eq!(vec!["example.org".to_owned()], validation.domains);
        assert_eq!(1, validation.instances);
        assert!(!validation.terminal);
        assert!(validation.can_extend());
    }

    #[test]
    fn three_hops_pass() {
        crate::init_test_log();
        let mut headers = message_headers();
        for domain in ["example.org", "example.net", "example.com"] {
            headers = add_hop(
                &headers,
                MESSAGE_BODY,
                &HopOptions {
                    domain,
                    ..hop_opts()
                },
            );
        }

        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Pass, validation.state);
        assert_eq!(Some(0), validation.oldest_pass);
        assert_eq!(
            vec!["example.com", "example.net", "example.org"],
            validation.domains,
        );
        assert_eq!(3, validation.instances);
    }

    #[test]
    fn modified_body_fails() {
        crate::init_test_log();
        let headers = add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        let validation = validate(&headers, b"Changed\r\n", 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert_eq!(None, validation.oldest_pass);
        assert_eq!(vec![Failure::BodyHashMismatch(1)], validation.failures);
        assert!(!validation.terminal);
    }

    #[test]
    fn modified_signed_header_fails() {
        crate::init_test_log();
        let mut headers =
            add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        for h in &mut headers {
            if h.is("Subject") {
                h.value = " Something else".to_owned();
            }
        }

        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert_eq!(vec![Failure::SignatureMismatch(1)], validation.failures);
    }

    #[test]
    fn modified_auth_results_breaks_seal() {
        crate::init_test_log();
        let mut headers =
            add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        for h in &mut headers {
            if h.is("ARC-Authentication-Results") {
                h.value.push_str("; spf=pass");
            }
        }

        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert_eq!(vec![Failure::SealMismatch(1)], validation.failures);
    }

    #[test]
    fn older_signature_broken_sets_oldest_pass() {
        crate::init_test_log();
        let hop1 = add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        // The second hop receives a passing chain but changes the body
        // before sealing what it forwards.
        let changed_body = b"Hello, modified world\r\n";
        let hop2 = add_hop(
            &hop1,
            changed_body,
            &HopOptions {
                domain: "example.net",
                force_state: Some(ChainState::Pass),
                ..hop_opts()
            },
        );
        let hop3 = add_hop(
            &hop2,
            changed_body,
            &HopOptions {
                domain: "example.com",
                ..hop_opts()
            },
        );

        let validation = validate(&hop3, changed_body, 1024);
        assert_eq!(ChainState::Pass, validation.state);
        assert_eq!(Some(2), validation.oldest_pass);
    }

    #[test]
    fn short_key_fails_minimum() {
        crate::init_test_log();
        let headers = add_hop(
            &message_headers(),
            MESSAGE_BODY,
            &HopOptions {
                selector: "small",
                key: &TEST_KEYS.rsa512,
                ..hop_opts()
            },
        );

        assert_eq!(
            ChainState::Pass,
            validate(&headers, MESSAGE_BODY, 512).state,
        );

        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert_matches!(
            Some(Failure::KeyTooShort {
                bits: 512,
                minimum: 1024,
                ..
            }),
            validation.failures.first().cloned()
        );
    }

    #[test]
    fn missing_and_revoked_keys() {
        crate::init_test_log();
        for (selector, expected) in [
            ("nonexistent", "KeyUnavailable"),
            ("revoked", "PublicKeyRevoked"),
            ("sha1only", "UnacceptableHashAlgorithm"),
        ] {
            let headers = add_hop(
                &message_headers(),
                MESSAGE_BODY,
                &HopOptions {
                    selector,
                    ..hop_opts()
                },
            );
            let validation = validate(&headers, MESSAGE_BODY, 1024);
            assert_eq!(ChainState::Fail, validation.state);
            assert!(
                format!("{:?}", validation.failures).contains(expected),
                "{selector}: {:?}",
                validation.failures,
            );
        }
    }

    #[test]
    fn expired_signature() {
        crate::init_test_log();
        let headers = add_hop(
            &message_headers(),
            MESSAGE_BODY,
            &HopOptions {
                ttl: Some(chrono::Duration::seconds(60)),
                now: test_now() - chrono::Duration::seconds(120),
                ..hop_opts()
            },
        );
        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(vec![Failure::ExpiredSignature(1)], validation.failures);
    }

    #[test]
    fn unexpected_cv_is_terminal() {
        crate::init_test_log();
        let hop1 = add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        let hop2 = add_hop(
            &hop1,
            MESSAGE_BODY,
            &HopOptions {
                force_state: Some(ChainState::Fail),
                ..hop_opts()
            },
        );

        let mut validation = validate(&hop2, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert!(validation.terminal);
        assert!(!validation.can_extend());
        assert_eq!(
            vec![Failure::UnexpectedChainValidation {
                instance: 2,
                found: ChainState::Fail,
                expected: ChainState::Pass,
            }],
            validation.failures,
        );
        assert!(!validation.apply_override(ChainState::Pass));
        assert_eq!(ChainState::Fail, validation.state);
    }

    #[test]
    fn structural_problems_are_invalid() {
        crate::init_test_log();
        let mut headers =
            add_hop(&message_headers(), MESSAGE_BODY, &hop_opts());
        let duplicate = headers
            .iter()
            .find(|h| h.is("ARC-Seal"))
            .cloned()
            .unwrap();
        headers.insert(0, duplicate);

        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Invalid, validation.state);
        assert!(!validation.can_extend());
        assert_eq!(0, validation.instances);
    }

    #[test]
    fn overlong_chains() {
        use crate::arc::chain::test_support::fake_set;

        crate::init_test_log();
        let mut headers = message_headers();
        for instance in 1..=51 {
            let cv = if 1 == instance { "none" } else { "pass" };
            headers.splice(0..0, fake_set(instance, cv));
        }
        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Fail, validation.state);
        assert!(validation.terminal);
        assert_eq!(51, validation.instances);

        let mut headers = fake_set(51, "pass");
        headers.extend(message_headers());
        let validation = validate(&headers, MESSAGE_BODY, 1024);
        assert_eq!(ChainState::Invalid, validation.state);
        assert!(!validation.terminal);
        assert!(!validation.can_extend());
    }

    #[test]
    fn overrides() {
        let mut passing = ChainValidation {
            state: ChainState::Pass,
            oldest_pass: Some(0),
            domains: vec!["example.org".to_owned()],
            instances: 1,
            ..ChainValidation::default()
        };

        let mut p = passing.clone();
        assert!(p.apply_override(ChainState::Pass));
        assert_eq!(Some(0), p.oldest_pass);

        let mut p = passing.clone();
        assert!(p.apply_override(ChainState::None));
        assert_eq!(ChainState::Pass, p.state);
        assert_eq!(Some(0), p.oldest_pass);

        assert!(passing.apply_override(ChainState::Fail));
        assert_eq!(ChainState::Fail, passing.state);
        assert_eq!(None, passing.oldest_pass);

        let mut none = ChainValidation::default();
        assert!(none.apply_override(ChainState::None));
        assert_eq!(ChainState::None, none.state);

        let mut invalid = ChainValidation {
            state: ChainState::Invalid,
            ..ChainValidation::default()
        };
        assert!(!invalid.apply_override(ChainState::Pass));
        assert_eq!(ChainState::Invalid, invalid.state);
    }
}

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

//! Per-message orchestration: collects the header block and body of one
//! message, validates its ARC chain and produces the headers to prepend.

use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::prelude::*;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::arc::hash::BodyHasher;
use crate::arc::key::load_private_key;
use crate::arc::{
    seal, ChainState, ChainValidation, Error, KeyResolver, KeyTable,
    SealInput, SealPolicy, SigningKey, Validator, VerificationEnvironment,
};
use crate::authres::{aggregate, arc_override, render, AuthResult};
use crate::mime::header::{fix_crlf_str, HeaderField};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::{
    OversizeAction, SystemConfig, MAX_SIGNATURE_TTL,
};


pub const AUTHENTICATION_RESULTS: &str = "Authentication-Results";
pub const SOFTWARE_HEADER: &str = "ARC-Filter";

/// What the filter does with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
pub enum Mode {
    /// Only add a new ARC set.
    #[serde(rename = "sign")]
    Sign,
    /// Only report the chain state in `Authentication-Results`.
    #[serde(rename = "verify")]
    Verify,
    #[default]
    #[serde(rename = "sign+verify")]
    SignVerify,
}

impl Mode {
    pub fn signs(self) -> bool {
        matches!(self, Self::Sign | Self::SignVerify)
    }

    pub fn verifies(self) -> bool {
        matches!(self, Self::Verify | Self::SignVerify)
    }

    fn without_signing(self) -> Option<Self> {
        match self {
            Self::Sign => None,
            Self::Verify | Self::SignVerify => Some(Self::Verify),
        }
    }
}

/// What the mail server knows about the connection a message came in on.
#[derive(Clone, Debug, Default)]
pub struct Connection {
    /// The connecting peer; `None` for local submission.
    pub peer: Option<IpAddr>,
    pub queue_id: Option<String>,
}

/// The verdict on a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Accept the message after prepending these headers, in order.
    Accept(Vec<HeaderField>),
    /// The message is not processed: the peer is exempt, or the configured
    /// mode leaves nothing to do for it.
    Skip,
    /// Refuse the message.
    Reject(String),
}

/// Process-wide state, shared read-only by all sessions.
pub struct Filter {
    config: Arc<SystemConfig>,
    key: Option<Arc<SigningKey>>,
    resolver: Arc<dyn KeyResolver + Send + Sync>,
    seal_policy: Option<SealPolicy>,
    hostname: String,
}

impl Filter {
    pub fn new(
        config: Arc<SystemConfig>,
        key: Option<SigningKey>,
        resolver: Arc<dyn KeyResolver + Send + Sync>,
    ) -> Self {
        let seal_policy = config.signing.as_ref().map(|signing| SealPolicy {
            authserv_id: config.authserv_id.clone(),
            domain: signing.domain.clone(),
            selector: signing.selector.clone(),
            algorithm: signing.algorithm,
            canonicalisation: signing.canonicalization,
            sign_headers: signing.sign_headers.clone(),
            oversign_headers: signing.oversign_headers.clone(),
            signature_ttl: signing
                .signature_ttl
                .map(|secs| secs.min(MAX_SIGNATURE_TTL))
                .map(|secs| chrono::Duration::seconds(secs as i64)),
        });
        if seal_policy.is_none() && config.mode.signs() {
            warn!("No [signing] configuration; messages will not be sealed");
        }

        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_owned());

        Self {
            config,
            key: key.map(Arc::new),
            resolver,
            seal_policy,
            hostname,
        }
    }

    /// Builds the filter from a validated configuration, loading the
    /// signing key and the key table it names.
    pub fn from_config(config: SystemConfig) -> Result<Self, String> {
        config.validate()?;

        let key = match config.signing {
            Some(ref signing) => match signing.key_file {
                Some(ref path) => Some(load_private_key(path)?),
                None => None,
            },
            None => None,
        };

        let resolver = match config.verification.key_table {
            Some(ref path) => KeyTable::load(path)?,
            None => {
                warn!("No key_table configured; ARC verification will fail");
                KeyTable::default()
            },
        };

        Ok(Self::new(Arc::new(config), key, Arc::new(resolver)))
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Starts processing a message received on `connection`.
    pub fn session(&self, connection: Connection) -> Session<'_> {
        let log_prefix = LogPrefix::new("arc".to_owned());
        if let Some(peer) = connection.peer {
            log_prefix.set_peer(peer.to_string());
        }
        if let Some(ref queue_id) = connection.queue_id {
            log_prefix.set_queue_id(queue_id.clone());
        }

        let mode = self.mode_for(connection.peer);
        if mode.is_none() {
            info!("{log_prefix} Not processing message from this peer");
        }

        Session {
            filter: self,
            log_prefix,
            peer: connection.peer,
            queue_id: connection.queue_id,
            mode,
            headers: Vec::new(),
            header_bytes: 0,
            oversize: None,
            body: None,
        }
    }

    fn mode_for(&self, peer: Option<IpAddr>) -> Option<Mode> {
        if peer.is_some_and(|ip| self.config.peer_list.contains(ip)) {
            return None;
        }

        let mut mode = Some(self.config.mode);
        // Only hosts we trust to originate mail get their messages sealed.
        if !peer.map_or(true, |ip| self.config.internal_hosts.contains(ip)) {
            mode = mode.and_then(Mode::without_signing);
        }
        if self.seal_policy.is_none() || self.key.is_none() {
            mode = mode.and_then(Mode::without_signing);
        }

        mode
    }
}

/// The processing of a single message.
///
/// Header fields are passed in one by one with `header`, then the body is
/// written, and `finish` produces the verdict.
pub struct Session<'f> {
    filter: &'f Filter,
    log_prefix: LogPrefix,
    peer: Option<IpAddr>,
    queue_id: Option<String>,
    /// `None` if the message is not processed at all.
    mode: Option<Mode>,
    headers: Vec<HeaderField>,
    header_bytes: usize,
    oversize: Option<String>,
    body: Option<BodyState>,
}

/// Started once the header block is complete.
struct BodyState {
    validator: Validator,
    hasher: Option<BodyHasher>,
}

impl BodyState {
    fn new(
        headers: &[HeaderField],
        mode: Option<Mode>,
        policy: Option<&SealPolicy>,
    ) -> Self {
        Self {
            validator: Validator::new(headers),
            hasher: policy.filter(|_| mode.is_some_and(Mode::signs)).map(
                |p| BodyHasher::new(p.canonicalisation.body, p.algorithm.hash),
            ),
        }
    }
}

impl Session<'_> {
    /// Adds the next header field.
    ///
    /// `value` is the raw value as received, typically starting with a
    /// space. Fails if the header block exceeds the configured limits and
    /// such messages are rejected.
    pub fn header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        if self.mode.is_none() || self.oversize.is_some() {
            return Ok(());
        }

        let config = &self.filter.config;
        let value = if config.fix_crlf {
            fix_crlf_str(value)
        } else {
            value.into()
        };
        let field = HeaderField::new(name, value);
        self.header_bytes += field.wire_len();
        self.headers.push(field);

        let limits = &config.limits;
        let problem = if 0 != limits.maximum_header_count
            && self.headers.len() > limits.maximum_header_count
        {
            Some(format!(
                "more than {} header fields",
                limits.maximum_header_count,
            ))
        } else if 0 != limits.maximum_header_bytes
            && self.header_bytes > limits.maximum_header_bytes
        {
            Some(format!(
                "header block larger than {} bytes",
                limits.maximum_header_bytes,
            ))
        } else {
            None
        };

        if let Some(problem) = problem {
            warn!("{} Oversized message: {problem}", self.log_prefix);
            self.oversize = Some(problem.clone());
            if OversizeAction::Reject == limits.oversize_action {
                return Err(Error::ResourceLimitExceeded(problem));
            }
        }

        Ok(())
    }

    fn body_state(&mut self) -> &mut BodyState {
        let headers = &self.headers;
        let mode = self.mode;
        let policy = self.filter.seal_policy.as_ref();
        self.body
            .get_or_insert_with(|| BodyState::new(headers, mode, policy))
    }

    /// Completes processing of the message.
    pub fn finish(mut self, now: DateTime<Utc>) -> Result<Disposition, Error> {
        let Some(mode) = self.mode else {
            return Ok(Disposition::Skip);
        };

        let config = Arc::clone(&self.filter.config);
        if let Some(problem) = self.oversize.take() {
            return Ok(match config.limits.oversize_action {
                OversizeAction::Reject => Disposition::Reject(problem),
                OversizeAction::Accept => Disposition::Accept(Vec::new()),
            });
        }

        let now = config
            .fixed_timestamp
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
            .unwrap_or(now);

        self.body_state();
        let Some(body) = self.body.take() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "body state missing",
            )));
        };

        let env = VerificationEnvironment {
            now,
            keys: &*self.filter.resolver,
            minimum_key_bits: config.verification.minimum_key_bits,
        };
        let (mut validation, chain) =
            body.validator.finish(&self.headers, &env);
        info!(
            "{} ARC chain {} ({} instances)",
            self.log_prefix, validation.state, validation.instances,
        );

        let ar_config = &config.authentication_results;
        let ar_values = self
            .headers
            .iter()
            .filter(|h| h.is(AUTHENTICATION_RESULTS))
            .map(|h| h.value.as_str())
            .collect::<Vec<_>>();

        let mut carried = None::<AuthResult>;
        if ar_config.permit_overrides {
            if let Some(reported) =
                arc_override(ar_values.iter().copied(), &config.authserv_id)
            {
                match ChainState::parse(&reported.result) {
                    Ok(state) if validation.apply_override(state) => {
                        info!(
                            "{} Authentication-Results reports arc={}",
                            self.log_prefix, reported.result,
                        );
                        if ChainState::None != state {
                            carried = Some(reported);
                        }
                    },
                    Ok(_) => debug!(
                        "{} Ignoring arc={} from Authentication-Results",
                        self.log_prefix, reported.result,
                    ),
                    Err(e) => debug!("{} {e}", self.log_prefix),
                }
            }
        }

        let own = self.own_result(&validation);
        let mut prepend = Vec::<HeaderField>::new();

        if mode.signs() {
            if let (Some(policy), Some(key), Some(hasher)) = (
                self.filter.seal_policy.as_ref(),
                self.filter.key.as_ref(),
                body.hasher,
            ) {
                if validation.can_extend() {
                    let mut digest = aggregate(
                        ar_values.iter().copied(),
                        &config.authserv_id,
                        ar_config.max_results,
                    );
                    let results = match carried {
                        Some(reported) => {
                            digest.results.push(reported);
                            render(&digest, None)
                        },
                        None => render(&digest, Some(&own)),
                    };

                    let body_hash = hasher.finish()?;
                    match seal(
                        policy,
                        key,
                        &SealInput {
                            validation: &validation,
                            chain: &chain,
                            results: &results,
                            headers: &self.headers,
                            body_hash: &body_hash,
                            now,
                        },
                    ) {
                        Ok(set) => prepend.extend(set),
                        Err(e) => error!(
                            "{} Failed to seal message: {e}",
                            self.log_prefix,
                        ),
                    }
                } else {
                    info!(
                        "{} ARC chain cannot be extended; not sealing",
                        self.log_prefix,
                    );
                }
            }
        }

        if mode.verifies() {
            prepend.push(HeaderField::new(
                AUTHENTICATION_RESULTS,
                format!("{}; {own}", config.authserv_id),
            ));
        }

        if config.software_header {
            prepend.push(HeaderField::new(
                SOFTWARE_HEADER,
                format!(
                    "{} v{} {} {}",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION"),
                    self.filter.hostname,
                    self.queue_id.as_deref().unwrap_or("NOQUEUE"),
                ),
            ));
        }

        Ok(Disposition::Accept(prepend))
    }

    /// The filter's own `arc` result.
    fn own_result(&self, validation: &ChainValidation) -> AuthResult {
        let ar_config = &self.filter.config.authentication_results;

        let mut own = AuthResult::new("arc", validation.state.keyword());
        if let Some(oldest_pass) = validation.oldest_pass {
            own = own.with_property(
                "header",
                "oldest-pass",
                oldest_pass.to_string(),
                false,
            );
        }
        if ar_config.report_remote_ip {
            if let Some(peer) = self.peer {
                own = own.with_property(
                    "smtp",
                    "remote-ip",
                    peer.to_string(),
                    false,
                );
            }
        }
        if ar_config.final_receiver
            && ChainState::Pass == validation.state
            && !validation.domains.is_empty()
        {
            own = own.with_property(
                "arc",
                "chain",
                validation.domains.join(":"),
                true,
            );
        }

        own
    }
}

/// Writing to a `Session` feeds it the message body.
impl Write for Session<'_> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if self.mode.is_none() || self.oversize.is_some() {
            return Ok(src.len());
        }

        let body = self.body_state();
        body.validator.write_all(src)?;
        if let Some(ref mut hasher) = body.hasher {
            hasher.write_all(src)?;
        }

        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

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

//! Grouping of ARC header fields into instances.

use std::collections::BTreeMap;
use std::fmt;

use super::error::StructuralError;
use super::record::{AuthResultsRecord, SealRecord, SignatureRecord};
use crate::mime::header::HeaderField;

/// RFC 8617 § 4.2.1
pub const MAX_INSTANCES: u32 = 50;

pub const SEAL_HEADER: &str = "ARC-Seal";
pub const SIGNATURE_HEADER: &str = "ARC-Message-Signature";
pub const AUTH_RESULTS_HEADER: &str = "ARC-Authentication-Results";

/// The validation state of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChainState {
    /// There is no chain.
    #[default]
    None,
    Pass,
    Fail,
    /// The ARC headers are malformed; nothing was verified.
    Invalid,
}

impl ChainState {
    /// Parses a `cv=` or `arc=` value. `Invalid` has no textual form.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            s => Err(format!("unknown chain validation state: {s}")),
        }
    }

    /// The keyword reported in `cv=` and `arc=`.
    ///
    /// An invalid chain is reported as if there were no chain at all.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::None | Self::Invalid => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Invalid => write!(f, "invalid"),
            s => write!(f, "{}", s.keyword()),
        }
    }
}

/// One complete ARC set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArcInstance {
    pub number: u32,
    pub seal: SealRecord,
    pub signature: SignatureRecord,
    pub auth_results: AuthResultsRecord,
}

#[derive(Default)]
struct Slot {
    seal: Option<SealRecord>,
    signature: Option<SignatureRecord>,
    auth_results: Option<AuthResultsRecord>,
}

fn fill<T>(
    slot: &mut Option<T>,
    value: T,
    header: &'static str,
    instance: u32,
) -> Result<(), StructuralError> {
    if slot.is_some() {
        return Err(StructuralError::Duplicate { header, instance });
    }

    *slot = Some(value);
    Ok(())
}

fn unparsable(header: &'static str) -> impl FnOnce(String) -> StructuralError {
    move |reason| StructuralError::Unparsable { header, reason }
}

/// Collects the ARC sets from `headers`, newest first.
///
/// Every ARC header must parse, and instances must run from 1 up to the
/// newest without gaps, each with exactly one member of each kind. Nothing
/// here involves cryptography.
pub fn collect_instances(
    headers: &[HeaderField],
) -> Result<Vec<ArcInstance>, StructuralError> {
    let mut slots = BTreeMap::<u32, Slot>::new();

    for field in headers {
        if field.is(SEAL_HEADER) {
            let seal = SealRecord::parse(field).map_err(unparsable(SEAL_HEADER))?;
            let instance = seal.instance;
            let slot = slots.entry(instance).or_default();
            fill(&mut slot.seal, seal, SEAL_HEADER, instance)?;
        } else if field.is(SIGNATURE_HEADER) {
            let signature = SignatureRecord::parse(field)
                .map_err(unparsable(SIGNATURE_HEADER))?;
            let instance = signature.instance;
            let slot = slots.entry(instance).or_default();
            fill(&mut slot.signature, signature, SIGNATURE_HEADER, instance)?;
        } else if field.is(AUTH_RESULTS_HEADER) {
            let auth_results = AuthResultsRecord::parse(field)
                .map_err(unparsable(AUTH_RESULTS_HEADER))?;
            let instance = auth_results.instance;
            let slot = slots.entry(instance).or_default();
            fill(
                &mut slot.auth_results,
                auth_results,
                AUTH_RESULTS_HEADER,
                instance,
            )?;
        }
    }

    let newest = slots.keys().next_back().copied().unwrap_or(0);
    // Gaps take precedence over the ceiling, so a stray high instance is
    // malformed rather than an overlong chain. The search is bounded by the
    // number of slots.
    if let Some(number) = (1..=newest).rev().find(|n| !slots.contains_key(n))
    {
        return Err(StructuralError::Missing {
            header: SEAL_HEADER,
            instance: number,
        });
    }

    let mut instances = Vec::with_capacity(slots.len());
    for number in (1..=newest).rev() {
        let slot = slots.remove(&number).unwrap_or_default();
        let missing = |header| StructuralError::Missing {
            header,
            instance: number,
        };

        instances.push(ArcInstance {
            number,
            seal: slot.seal.ok_or_else(|| missing(SEAL_HEADER))?,
            signature: slot.signature.ok_or_else(|| missing(SIGNATURE_HEADER))?,
            auth_results: slot
                .auth_results
                .ok_or_else(|| missing(AUTH_RESULTS_HEADER))?,
        });
    }

    if newest > MAX_INSTANCES {
        return Err(StructuralError::TooManyInstances(newest));
    }

    Ok(instances)
}

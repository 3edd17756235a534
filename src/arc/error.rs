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

use thiserror::Error;

use super::{ChainState, HashAlgorithm};

/// Errors which stop the processing of a message.
///
/// Problems with the ARC chain itself are not errors: they are reported
/// through `ChainValidation` as `StructuralError`s and `Failure`s.
#[derive(Error, Debug)]
pub enum Error {
    /// The message exceeds a configured limit.
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
    #[error("unexpected OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error("unexpected I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with the shape of the chain, found before any cryptography.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("can't parse {header} header: {reason}")]
    Unparsable {
        header: &'static str,
        reason: String,
    },
    #[error("duplicate {header} for instance {instance}")]
    Duplicate {
        header: &'static str,
        instance: u32,
    },
    #[error("missing {header} for instance {instance}")]
    Missing {
        header: &'static str,
        instance: u32,
    },
    #[error("instance {0} is beyond the limit of 50")]
    TooManyInstances(u32),
}

/// Reasons an instance failed verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("instance {instance} declares cv={found}, expected cv={expected}")]
    UnexpectedChainValidation {
        instance: u32,
        found: ChainState,
        expected: ChainState,
    },
    #[error("no usable key at {0}: {1}")]
    KeyUnavailable(String, String),
    #[error("the public key at {0} was revoked")]
    PublicKeyRevoked(String),
    #[error("the key at {0} does not permit {1}")]
    UnacceptableHashAlgorithm(String, HashAlgorithm),
    #[error("the key at {0} is not a usable RSA public key")]
    InvalidPublicKey(String),
    #[error("the key at {location} has {bits} bits, below the minimum {minimum}")]
    KeyTooShort {
        location: String,
        bits: u32,
        minimum: u32,
    },
    #[error("the key at {0} is unreasonably large")]
    KeyTooLarge(String),
    #[error("instance {0}: body hash does not match bh=")]
    BodyHashMismatch(u32),
    #[error("instance {0}: message signature does not match")]
    SignatureMismatch(u32),
    #[error("instance {0}: seal does not match")]
    SealMismatch(u32),
    #[error("instance {0}: message signature expired")]
    ExpiredSignature(u32),
    #[error("unexpected error: {0}")]
    Internal(String),
}

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

//! ARC (RFC 8617) chain validation and sealing.
//!
//! The DKIM machinery ARC builds on (tag lists, canonicalisation, key
//! records) lives here as well, since nothing else in the crate needs it.

pub mod canonicalisation;
pub mod chain;
mod error;
pub mod hash;
pub mod key;
pub mod record;
pub mod seal;
pub mod tag;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_keys;

pub use canonicalisation::Canonicalisation;
pub use chain::{ArcInstance, ChainState, MAX_INSTANCES};
pub use error::*;
pub use key::{KeyLookupError, KeyResolver, KeyTable, SigningKey};
pub use record::{Algorithm, HashAlgorithm};
pub use seal::{seal, SealInput, SealPolicy, DEFAULT_SIGN_HEADERS};
pub use validate::{ChainValidation, Validator, VerificationEnvironment};

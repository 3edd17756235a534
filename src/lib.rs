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

//! ARC (RFC 8617) sealing and verification for mail filters.
//!
//! The crate is organised bottom-up: `authres` handles the RFC 8601
//! `Authentication-Results` grammar, `arc` validates and extends ARC chains,
//! and `filter` ties both together for a single message handed over by the
//! mail server.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod arc;
pub mod authres;
pub mod cli;
pub mod filter;
pub mod mime;
pub mod support;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let config = support::logging::stderr_config(log::LevelFilter::Debug)
            .expect("invalid test log configuration");
        log4rs::init_config(config).expect("failed to initialise test log");
    })
}

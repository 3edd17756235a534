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

use log::debug;

use super::{parse_header, AuthResult, AuthResultSet, ResInfo};

/// Collects the results from all `Authentication-Results` values which
/// belong to `authserv_id`.
///
/// Values for other authserv-ids and values which fail to parse contribute
/// nothing. `arc` results are never collected. Only the first result for
/// each method is kept, except for methods which can legitimately occur more
/// than once. Collection stops once `max_results` results have been
/// accepted.
pub fn aggregate<'a>(
    values: impl IntoIterator<Item = &'a str>,
    authserv_id: &str,
    max_results: usize,
) -> AuthResultSet {
    let mut set = AuthResultSet {
        authserv_id: authserv_id.to_owned(),
        results: Vec::new(),
    };

    for value in values {
        let parsed = match parse_header(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Ignoring Authentication-Results: {e}");
                continue;
            },
        };

        if !parsed.authserv_id.eq_ignore_ascii_case(authserv_id) {
            continue;
        }

        for info in parsed.results {
            let ResInfo::Result(result) = info else {
                continue;
            };

            // Earlier chain states are superseded by the one being reported
            // now, so they neither appear nor count towards the cap.
            if "arc" == result.method {
                continue;
            }

            if !result.repeatable()
                && set.results.iter().any(|r| r.method == result.method)
            {
                continue;
            }

            if set.results.len() >= max_results {
                debug!(
                    "Dropping further Authentication-Results beyond \
                     {max_results} results"
                );
                return set;
            }

            set.results.push(result);
        }
    }

    set
}

/// Finds the `arc` result which may override the computed chain state.
///
/// Only the topmost value belonging to `authserv_id` which carries an `arc`
/// result is consulted.
pub fn arc_override<'a>(
    values: impl IntoIterator<Item = &'a str>,
    authserv_id: &str,
) -> Option<AuthResult> {
    values
        .into_iter()
        .filter_map(|v| parse_header(v).ok())
        .filter(|p| p.authserv_id.eq_ignore_ascii_case(authserv_id))
        .find_map(|p| {
            p.results.into_iter().find_map(|info| match info {
                ResInfo::Result(r) if "arc" == r.method => Some(r),
                _ => None,
            })
        })
}

/// Renders the results of `set`, followed by `own` if given, as the body of
/// an `Authentication-Results`-style header (after the authserv-id).
pub fn render(set: &AuthResultSet, own: Option<&AuthResult>) -> String {
    let rendered = set
        .results
        .iter()
        .chain(own)
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    if rendered.is_empty() {
        "none".to_owned()
    } else {
        rendered.join(";\n\t")
    }
}

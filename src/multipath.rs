// Bitcoin output descriptor library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2023-2025 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2023-2025 LNP/BP Standards Association. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Multipath descriptor resolver: rewrites `/**` shorthand and
//! `/<a;b;…>` tuples against a caller-supplied `change` value, ahead of any
//! wrapper parsing.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ParseError, RangeError};

fn re_tuple() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/<([0-9;]+)>").unwrap())
}

/// Resolves every `/**` and `/<a;b;…>` occurrence in `descriptor` against
/// `change`, returning the descriptor text with each tuple replaced by the
/// chosen value.
///
/// Running this function again on its own output is a no-op, because by
/// then no `/<…>` segments remain.
pub fn resolve_multipath(descriptor: &str, change: Option<u32>) -> Result<String, crate::Error> {
    let rewritten = descriptor.replace("/**", "/<0;1>/*");

    let mut tuples = Vec::new();
    for caps in re_tuple().captures_iter(&rewritten) {
        let body = &caps[1];
        let values = parse_tuple(body)?;
        tuples.push(values);
    }

    if tuples.is_empty() {
        return Ok(rewritten);
    }

    let cardinality = tuples[0].len();
    for t in &tuples {
        if t.len() != cardinality {
            return Err(ParseError::MismatchedMultipathCardinality(cardinality, t.len()).into());
        }
    }

    let change = change.ok_or(RangeError::MissingChange)?;
    for t in &tuples {
        if !t.contains(&change) {
            return Err(RangeError::ChangeNotInTuple(change).into());
        }
    }

    let mut result = String::with_capacity(rewritten.len());
    let mut last = 0;
    for caps in re_tuple().captures_iter(&rewritten) {
        let m = caps.get(0).unwrap();
        result.push_str(&rewritten[last..m.start()]);
        result.push('/');
        result.push_str(&change.to_string());
        last = m.end();
    }
    result.push_str(&rewritten[last..]);
    Ok(result)
}

fn parse_tuple(body: &str) -> Result<Vec<u32>, ParseError> {
    let parts: Vec<&str> = body.split(';').collect();
    if parts.len() < 2 {
        return Err(ParseError::InvalidMultipathTuple(body.to_owned()));
    }
    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        let v: u32 = part.parse().map_err(|_| ParseError::InvalidMultipathTuple(body.to_owned()))?;
        values.push(v);
    }
    if !values.windows(2).all(|w| w[0] < w[1]) {
        return Err(ParseError::InvalidMultipathTuple(body.to_owned()));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_shorthand_rewrite() {
        let resolved = resolve_multipath("wpkh(xpub.../0/**)", Some(0)).unwrap();
        assert_eq!(resolved, "wpkh(xpub.../0/0/*)");
    }

    #[test]
    fn tuple_rewrite() {
        let resolved = resolve_multipath("wpkh(xpub.../<0;1>/*)", Some(1)).unwrap();
        assert_eq!(resolved, "wpkh(xpub.../1/*)");
    }

    #[test]
    fn missing_change_fails() {
        assert!(resolve_multipath("wpkh(xpub.../<0;1>/*)", None).is_err());
    }

    #[test]
    fn change_not_in_tuple_fails() {
        assert!(resolve_multipath("wpkh(xpub.../<0;1>/*)", Some(2)).is_err());
    }

    #[test]
    fn mismatched_cardinality_fails() {
        let d = "wsh(multi(2,xpub1/<0;1>/*,xpub2/<0;1;2>/*))";
        assert!(resolve_multipath(d, Some(0)).is_err());
    }

    #[test]
    fn not_strictly_increasing_fails() {
        assert!(parse_tuple("1;0").is_err());
        assert!(parse_tuple("0;0").is_err());
        assert!(parse_tuple("0").is_err());
    }

    #[test]
    fn idempotent_on_resolved_text() {
        let once = resolve_multipath("wpkh(xpub.../<0;1>/*)", Some(1)).unwrap();
        let twice = resolve_multipath(&once, Some(1)).unwrap();
        assert_eq!(once, twice);
    }
}

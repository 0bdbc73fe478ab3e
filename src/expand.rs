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

//! Miniscript expander: replaces every key expression occurring
//! in an inner miniscript fragment with a stable `@N` placeholder, and
//! records the substitution in an [`ExpansionMap`].
//!
//! The scanner is AST-directed rather than a blind whole-string regex: it
//! first walks the fragment tracking paren depth to
//! find the hash-fragment calls (`sha256(...)`, `hash256(...)`,
//! `ripemd160(...)`, `hash160(...)`) and marks their hex operand as opaque,
//! then matches key expressions only outside those spans.

use std::collections::HashMap;
use std::sync::OnceLock;

use bitcoin::Network;
use regex::Regex;

use crate::error::ParseError;
use crate::keyexpr::{resolve_key_expression, KeyInfo};

/// Insertion-ordered mapping from `@N` placeholder index to the [`KeyInfo`]
/// it stands for. Equal key-expression text always maps to the same index.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ExpansionMap {
    entries: Vec<KeyInfo>,
    index_of: HashMap<String, usize>,
}

impl ExpansionMap {
    /// An empty map.
    pub fn new() -> Self { Self::default() }

    /// Returns the placeholder index for `key_expression`, inserting a new
    /// entry in first-occurrence order if it hasn't been seen before.
    pub fn intern(&mut self, info: KeyInfo) -> usize {
        if let Some(&i) = self.index_of.get(&info.key_expression) {
            return i;
        }
        let i = self.entries.len();
        self.index_of.insert(info.key_expression.clone(), i);
        self.entries.push(info);
        i
    }

    /// The [`KeyInfo`] behind placeholder `@i`.
    pub fn get(&self, i: usize) -> Option<&KeyInfo> { self.entries.get(i) }

    /// Number of distinct key expressions recorded.
    pub fn len(&self) -> usize { self.entries.len() }

    /// True if no key expression has been recorded.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterates `(@N, KeyInfo)` pairs in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &KeyInfo)> {
        self.entries.iter().enumerate()
    }
}

fn re_key_expr() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?:\[[0-9a-fA-F]{8}(?:/[0-9]+[hH']?)*\])?
            (?:
                [tx](?:pub|prv)[1-9A-HJ-NP-Za-km-z]{79,108}(?:/[0-9]+[hH']?)*(?:/\*)?
              | [5KLc9][1-9A-HJ-NP-Za-km-z]{50,51}
              | (?:02|03)[0-9a-fA-F]{64}
              | 04[0-9a-fA-F]{128}
              | [0-9a-fA-F]{64}
            )
            ",
        )
        .unwrap()
    })
}

fn re_hash_fragment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:sha256|hash256|ripemd160|hash160)\(").unwrap())
}

/// Computes the byte ranges of hash-fragment hex operands (`sha256(<hex>)`
/// and friends) so the key-expression scanner can skip over them.
fn opaque_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    for m in re_hash_fragment().find_iter(text) {
        let arg_start = m.end();
        let mut depth = 1i32;
        let bytes = text.as_bytes();
        let mut i = arg_start;
        while i < bytes.len() && depth > 0 {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        ranges.push((arg_start, i.saturating_sub(1)));
    }
    ranges
}

fn in_opaque(ranges: &[(usize, usize)], pos: usize) -> bool {
    ranges.iter().any(|&(start, end)| pos >= start && pos < end)
}

/// Replaces every key expression in `miniscript_text` with a stable `@N`
/// placeholder, returning the rewritten text and the accumulated
/// [`ExpansionMap`].
///
/// `taproot` selects x-only (32-byte) pubkey normalization for the
/// placeholders' underlying [`KeyInfo`]; legacy/segwit-v0 descriptors use
/// compressed (33-byte) pubkeys.
pub fn expand_miniscript(
    miniscript_text: &str,
    network: Network,
    taproot: bool,
    index: Option<u32>,
) -> Result<(String, ExpansionMap), crate::Error> {
    let opaque = opaque_ranges(miniscript_text);
    let mut map = ExpansionMap::new();
    let mut out = String::with_capacity(miniscript_text.len());
    let mut last = 0usize;

    for m in re_key_expr().find_iter(miniscript_text) {
        if in_opaque(&opaque, m.start()) {
            continue;
        }
        let expr = m.as_str();
        let mut info = resolve_key_expression(expr, network, index)
            .map_err(|_| ParseError::InvalidKeyExpression(expr.to_owned()))?;
        if taproot && info.pubkey.len() == 33 {
            // Normalize to x-only by dropping the parity-sign byte.
            info.pubkey = info.pubkey[1..].to_vec();
        }
        let placeholder = map.intern(info);

        out.push_str(&miniscript_text[last..m.start()]);
        out.push_str(&format!("@{placeholder}"));
        last = m.end();
    }
    out.push_str(&miniscript_text[last..]);
    Ok((out, map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_becomes_placeholder() {
        let (expanded, map) = expand_miniscript(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
            Network::Bitcoin,
            false,
            None,
        )
        .unwrap();
        assert_eq!(expanded, "pk(@0)");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn duplicate_key_shares_placeholder() {
        let key = "03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b";
        let text = format!("and_v(v:pk({key}),pk({key}))");
        let (expanded, map) = expand_miniscript(&text, Network::Bitcoin, false, None).unwrap();
        assert_eq!(expanded, "and_v(v:pk(@0),pk(@0))");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn hash_fragment_hex_is_not_a_key() {
        let text = "and_v(v:sha256(6c60f404f8167a38fc70eaf8aa17ac351023bef86bcb9d1086a19afe95bd5e5a),pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b))";
        let (_expanded, map) = expand_miniscript(text, Network::Bitcoin, false, None).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn taproot_mode_normalizes_to_x_only() {
        let (_expanded, map) = expand_miniscript(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
            Network::Bitcoin,
            true,
            None,
        )
        .unwrap();
        assert_eq!(map.get(0).unwrap().pubkey.len(), 32);
    }

    #[test]
    fn placeholder_indexing_is_stable_across_runs() {
        let text = "and_v(v:pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b),pk(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5))";
        let (e1, _) = expand_miniscript(text, Network::Bitcoin, false, None).unwrap();
        let (e2, _) = expand_miniscript(text, Network::Bitcoin, false, None).unwrap();
        assert_eq!(e1, e2);
    }
}

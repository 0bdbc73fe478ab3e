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

//! Ledger policy extractor: rewrites a descriptor into the
//! `@i/**` placeholder template a Ledger hardware wallet's registration
//! protocol expects, alongside the ordered list of key roots.
//!
//! `sortedmulti`/`sortedmulti_a` function names are left untouched; only
//! the key expressions inside them are replaced, so a registered policy
//! still recognizes the sorted-key node.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;

/// A descriptor rewritten as a Ledger registration template, plus the
/// ordered key roots its `@i` placeholders refer to.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct LedgerPolicy {
    /// The descriptor with every key expression replaced by `@i/**`.
    pub template: String,
    /// The key root (origin + xpub, no trailing path) for each `@i`, in
    /// placeholder order.
    pub key_roots: Vec<String>,
}

fn re_key_root() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?:\[[0-9a-fA-F]{8}(?:/[0-9]+[hH']?)*\])?
            [txyYzZuU]?(?:pub|prv)[1-9A-HJ-NP-Za-km-z]{79,108}
            (?:/[0-9]+[hH']?)*(?:/\*\*|/<[0-9;]+>/\*|/\*)?
            ",
        )
        .unwrap()
    })
}

/// A key root is the origin-prefixed extended key with its trailing
/// derivation path (the `/49'/0'/0'` etc., and any terminal wildcard or
/// multipath tuple) stripped, since the Ledger template supplies `@i/**`
/// itself.
fn key_root_of(full: &str) -> &str {
    // Strip from the first `/` after the xpub/xprv text onward.
    let xkey_start = full.rfind(']').map_or(0, |i| i + 1);
    let xkey = &full[xkey_start..];
    let path_start = xkey.find('/').map(|i| xkey_start + i).unwrap_or(full.len());
    &full[..path_start]
}

/// Extracts a [`LedgerPolicy`] from a fully-resolved (multipath-free)
/// descriptor. `sortedmulti`/`sortedmulti_a` calls are left untouched: only
/// key expressions inside them are replaced, preserving the function name
/// so a registered policy still recognizes the sorted-key node.
pub fn extract_ledger_policy(descriptor: &str) -> Result<LedgerPolicy, crate::Error> {
    let mut key_roots: Vec<String> = Vec::new();
    let mut index_of: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut out = String::with_capacity(descriptor.len());
    let mut last = 0usize;

    for m in re_key_root().find_iter(descriptor) {
        let expr = m.as_str();
        let root = key_root_of(expr).to_owned();
        let placeholder_index = *index_of.entry(root.clone()).or_insert_with(|| {
            let i = key_roots.len();
            key_roots.push(root);
            i
        });

        out.push_str(&descriptor[last..m.start()]);
        out.push_str(&format!("@{placeholder_index}/**"));
        last = m.end();
    }
    out.push_str(&descriptor[last..]);

    if key_roots.is_empty() {
        return Err(ParseError::InvalidKeyExpression(descriptor.to_owned()).into());
    }

    Ok(LedgerPolicy { template: out, key_roots })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sortedmulti_template_matches_literal_vector() {
        let k0 = "[d34db33f/48'/0'/0'/2']xpub6EKMC2gSMfKgSwn7V9VVQhu4t3GUqybC7RXB7ZQtJ9dcTQFP5rKdDSDV6pZ9UJ24MG4g5tQ1HGp5RkFWKb4LN6gtGmwSREinGZ3y21PIZAF";
        let k1 = "[d34db33f/48'/0'/1'/2']xpub6EwqLKoSUAMhZXvBcFPdTVDAkaHpHGNbbU8Mj8sUPd9XKX1AJuRwhmFHCEomzZWBnUbNqYXkKpMiG8oTd2AzU9sU5hyfVFTmaZVgk9aJJDV";
        let text = format!("wsh(sortedmulti(1,{k0},{k1}))");
        let policy = extract_ledger_policy(&text).unwrap();
        assert_eq!(policy.template, "wsh(sortedmulti(1,@0/**,@1/**))");
        assert_eq!(policy.key_roots.len(), 2);
    }

    #[test]
    fn duplicate_key_shares_placeholder() {
        let k = "[d34db33f/48'/0'/0'/2']xpub6EKMC2gSMfKgSwn7V9VVQhu4t3GUqybC7RXB7ZQtJ9dcTQFP5rKdDSDV6pZ9UJ24MG4g5tQ1HGp5RkFWKb4LN6gtGmwSREinGZ3y21PIZAF";
        let text = format!("wsh(and_v(v:pk({k}),pk({k})))");
        let policy = extract_ledger_policy(&text).unwrap();
        assert_eq!(policy.template, "wsh(and_v(v:pk(@0/**),pk(@0/**)))");
        assert_eq!(policy.key_roots.len(), 1);
    }
}

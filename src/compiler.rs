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

//! Miniscript compiler/satisfier.
//!
//! Everything in this module is a thin adapter over the `miniscript` crate,
//! which is this library's external "miniscript engine" collaborator:
//! the AST parser, script encoder, sanity checker and minimum-weight
//! `Satisfier` search all belong to that crate. What is ours is expanding
//! `@N` placeholders back into concrete key bytes before handing text to
//! the engine, and translating the caller's signatures/preimages/time
//! constraints into the engine's `Satisfier` trait.

use std::cell::RefCell;
use std::collections::HashMap;
use std::str::FromStr;

use bitcoin::hashes::{hash160, ripemd160, sha256, sha256d, Hash};
use bitcoin::secp256k1::schnorr;
use bitcoin::sighash::TapSighashType;
use bitcoin::{ecdsa, taproot, PublicKey, ScriptBuf, XOnlyPublicKey};
use miniscript::{Legacy, Miniscript, Satisfier, Segwitv0, Tap};

use crate::error::SatisfactionError;
use crate::expand::ExpansionMap;

/// A preimage supplied for a hash-fragment in the miniscript, matched by
/// the literal digest expression text, e.g.
/// `sha256(6c60...e5a)`.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct Preimage {
    /// The hash-fragment text as it appears in the miniscript.
    pub digest: String,
    /// The preimage bytes.
    pub preimage: Vec<u8>,
}

/// Time-lock demands a chosen satisfaction branch makes, carried between a
/// planning pass (fake signatures) and a signing pass (real signatures) so
/// both select the same branch.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct TimeConstraints {
    pub n_lock_time: Option<u32>,
    pub n_sequence: Option<u32>,
}

/// Compiled script plus the miniscript engine's own sanity verdict.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct CompiledScript {
    pub script: ScriptBuf,
    pub sane: bool,
}

/// The minimum-weight witness/scriptSig satisfaction for a miniscript
/// fragment, plus any time-lock it assumes.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct ScriptSatisfaction {
    /// Stack items, bottom to top, that unlock the script.
    pub items: Vec<Vec<u8>>,
    pub time_constraints: TimeConstraints,
}

/// Substitutes every `@N` placeholder in `text` with the hex encoding of
/// its resolved key, matching tokens on a `@` + digit-run boundary so a
/// placeholder can never be confused with push-data bytes that happen to
/// contain the same characters.
fn substitute_placeholders(text: &str, map: &ExpansionMap) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            let n: usize = text[start..j].parse().expect("digit run");
            if let Some(info) = map.get(n) {
                out.push_str(&hex_encode(&info.pubkey));
                i = j;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Compiles an expanded miniscript (placeholders already substituted with
/// concrete key hex by this function) to its script bytes.
pub fn compile_miniscript(
    expanded_text: &str,
    map: &ExpansionMap,
    tapscript: bool,
) -> Result<CompiledScript, crate::Error> {
    let substituted = substitute_placeholders(expanded_text, map);
    if tapscript {
        compile_with::<XOnlyPublicKey, Tap>(&substituted)
    } else {
        compile_with::<PublicKey, Segwitv0>(&substituted)
    }
}

/// As [`compile_miniscript`], but for a legacy (`sh(...)`, non-segwit)
/// top-level miniscript, which allows a slightly different opcode budget.
pub fn compile_miniscript_legacy(
    expanded_text: &str,
    map: &ExpansionMap,
) -> Result<CompiledScript, crate::Error> {
    let substituted = substitute_placeholders(expanded_text, map);
    compile_with::<PublicKey, Legacy>(&substituted)
}

fn compile_with<Pk, Ctx>(text: &str) -> Result<CompiledScript, crate::Error>
where
    Pk: miniscript::MiniscriptKey + FromStr,
    Pk::Sha256: FromStr,
    Pk::Hash256: FromStr,
    Pk::Ripemd160: FromStr,
    Pk::Hash160: FromStr,
    Ctx: miniscript::ScriptContext,
{
    match Miniscript::<Pk, Ctx>::from_str(text) {
        Ok(ms) => Ok(CompiledScript { script: ms.encode(), sane: true }),
        Err(_) => {
            let ms = Miniscript::<Pk, Ctx>::from_str_insane(text)
                .map_err(|e| SatisfactionError::MissingSignature(e.to_string()))?;
            Ok(CompiledScript { script: ms.encode(), sane: false })
        }
    }
}

/// Adapts the caller's signatures/preimages/time-constraints to the
/// `miniscript` crate's [`Satisfier`] trait, keyed by hex-encoded pubkey
/// (ECDSA/compressed) or x-only pubkey (Schnorr).
struct MapSatisfier<'a> {
    ecdsa_sigs: &'a HashMap<String, ecdsa::Signature>,
    schnorr_sigs: &'a HashMap<String, schnorr::Signature>,
    sha256: HashMap<sha256::Hash, Vec<u8>>,
    hash256: HashMap<sha256d::Hash, Vec<u8>>,
    ripemd160: HashMap<ripemd160::Hash, Vec<u8>>,
    hash160: HashMap<hash160::Hash, Vec<u8>>,
    time_constraints: Option<TimeConstraints>,
    /// Every `after`/`older` value the engine queried while searching for a
    /// satisfaction, regardless of which branch those queries belonged to.
    /// Used by [`satisfy_and_derive`] to recover the winning branch's
    /// timelock demands after the fact.
    seen_locks: RefCell<Vec<u32>>,
    seen_seqs: RefCell<Vec<u32>>,
}

impl<'a> MapSatisfier<'a> {
    fn from_preimages(
        ecdsa_sigs: &'a HashMap<String, ecdsa::Signature>,
        schnorr_sigs: &'a HashMap<String, schnorr::Signature>,
        preimages: &[Preimage],
        time_constraints: Option<TimeConstraints>,
    ) -> Self {
        let mut sha256 = HashMap::new();
        let mut hash256 = HashMap::new();
        let mut ripemd160 = HashMap::new();
        let mut hash160 = HashMap::new();
        for p in preimages {
            let Some((kind, hex)) = split_digest(&p.digest) else { continue };
            match kind {
                "sha256" => {
                    if let Ok(h) = sha256::Hash::from_str(hex) {
                        sha256.insert(h, p.preimage.clone());
                    }
                }
                "hash256" => {
                    if let Ok(h) = sha256d::Hash::from_str(hex) {
                        hash256.insert(h, p.preimage.clone());
                    }
                }
                "ripemd160" => {
                    if let Ok(h) = ripemd160::Hash::from_str(hex) {
                        ripemd160.insert(h, p.preimage.clone());
                    }
                }
                "hash160" => {
                    if let Ok(h) = hash160::Hash::from_str(hex) {
                        hash160.insert(h, p.preimage.clone());
                    }
                }
                _ => {}
            }
        }
        MapSatisfier {
            ecdsa_sigs,
            schnorr_sigs,
            sha256,
            hash256,
            ripemd160,
            hash160,
            time_constraints,
            seen_locks: RefCell::new(Vec::new()),
            seen_seqs: RefCell::new(Vec::new()),
        }
    }
}

/// Splits a hash-fragment expression like `sha256(<hex>)` into its function
/// name and hex operand.
fn split_digest(digest: &str) -> Option<(&str, &str)> {
    let open = digest.find('(')?;
    let close = digest.rfind(')')?;
    Some((&digest[..open], &digest[open + 1..close]))
}

impl<'a> Satisfier<PublicKey> for MapSatisfier<'a> {
    fn lookup_ecdsa_sig(&self, pk: &PublicKey) -> Option<ecdsa::Signature> {
        self.ecdsa_sigs.get(&hex_encode(&pk.to_bytes())).copied()
    }

    fn lookup_sha256(&self, h: &sha256::Hash) -> Option<miniscript::Preimage32> {
        self.sha256.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_hash256(&self, h: &sha256d::Hash) -> Option<miniscript::Preimage32> {
        self.hash256.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_ripemd160(&self, h: &ripemd160::Hash) -> Option<miniscript::Preimage32> {
        self.ripemd160.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_hash160(&self, h: &hash160::Hash) -> Option<miniscript::Preimage32> {
        self.hash160.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn check_older(&self, seq: bitcoin::Sequence) -> bool {
        self.seen_seqs.borrow_mut().push(seq.to_consensus_u32());
        match self.time_constraints.and_then(|tc| tc.n_sequence) {
            Some(required) => seq.to_consensus_u32() <= required,
            None => true,
        }
    }

    fn check_after(&self, lock: bitcoin::absolute::LockTime) -> bool {
        self.seen_locks.borrow_mut().push(lock.to_consensus_u32());
        match self.time_constraints.and_then(|tc| tc.n_lock_time) {
            Some(required) => lock.to_consensus_u32() <= required,
            None => true,
        }
    }
}

impl<'a> Satisfier<XOnlyPublicKey> for MapSatisfier<'a> {
    fn lookup_tap_key_spend_sig(&self) -> Option<taproot::Signature> {
        self.schnorr_sigs
            .get("KEY")
            .map(|sig| taproot::Signature { signature: *sig, sighash_type: TapSighashType::Default })
    }

    fn lookup_tap_leaf_script_sig(
        &self,
        pk: &XOnlyPublicKey,
        _leaf_hash: &taproot::TapLeafHash,
    ) -> Option<taproot::Signature> {
        self.schnorr_sigs
            .get(&hex_encode(&pk.serialize()))
            .map(|sig| taproot::Signature { signature: *sig, sighash_type: TapSighashType::Default })
    }

    fn lookup_sha256(&self, h: &sha256::Hash) -> Option<miniscript::Preimage32> {
        self.sha256.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_hash256(&self, h: &sha256d::Hash) -> Option<miniscript::Preimage32> {
        self.hash256.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_ripemd160(&self, h: &ripemd160::Hash) -> Option<miniscript::Preimage32> {
        self.ripemd160.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn lookup_hash160(&self, h: &hash160::Hash) -> Option<miniscript::Preimage32> {
        self.hash160.get(h).and_then(|p| <[u8; 32]>::try_from(p.as_slice()).ok())
    }

    fn check_older(&self, seq: bitcoin::Sequence) -> bool {
        self.seen_seqs.borrow_mut().push(seq.to_consensus_u32());
        match self.time_constraints.and_then(|tc| tc.n_sequence) {
            Some(required) => seq.to_consensus_u32() <= required,
            None => true,
        }
    }

    fn check_after(&self, lock: bitcoin::absolute::LockTime) -> bool {
        self.seen_locks.borrow_mut().push(lock.to_consensus_u32());
        match self.time_constraints.and_then(|tc| tc.n_lock_time) {
            Some(required) => lock.to_consensus_u32() <= required,
            None => true,
        }
    }
}

/// Satisfies an already-parsed miniscript against the supplied
/// signatures/preimages, then recovers the `after`/`older` values the
/// winning branch actually demands.
///
/// When `time_constraints` is already `Some` (a signing pass pinned to a
/// prior planning pass), it is returned unchanged. When it is `None` (a
/// planning pass), every `after`/`older` value the satisfier observed while
/// searching is tried in turn as a single pinned constraint; a candidate
/// that reproduces the exact same witness items is the one the winning
/// branch requires. A candidate that doesn't affect branch selection either
/// way is harmless to report, since the contract is only that re-satisfying
/// under the returned constraints selects the same branch, not that the
/// constraints are minimal.
fn satisfy_and_derive<Pk, Ctx>(
    ms: &Miniscript<Pk, Ctx>,
    ecdsa_sigs: &HashMap<String, ecdsa::Signature>,
    schnorr_sigs: &HashMap<String, schnorr::Signature>,
    preimages: &[Preimage],
    time_constraints: Option<TimeConstraints>,
) -> Result<ScriptSatisfaction, crate::Error>
where
    Pk: miniscript::MiniscriptKey,
    Ctx: miniscript::ScriptContext,
    for<'a> MapSatisfier<'a>: Satisfier<Pk>,
{
    let satisfier = MapSatisfier::from_preimages(ecdsa_sigs, schnorr_sigs, preimages, time_constraints);
    let items = ms.satisfy(&satisfier).map_err(|_| SatisfactionError::Unsatisfiable)?;

    let resolved = match time_constraints {
        Some(tc) => tc,
        None => {
            let mut locks = satisfier.seen_locks.borrow().clone();
            locks.sort_unstable();
            locks.dedup();
            let mut seqs = satisfier.seen_seqs.borrow().clone();
            seqs.sort_unstable();
            seqs.dedup();

            let n_lock_time = locks.into_iter().find(|&l| {
                let probe = MapSatisfier::from_preimages(
                    ecdsa_sigs,
                    schnorr_sigs,
                    preimages,
                    Some(TimeConstraints { n_lock_time: Some(l), n_sequence: None }),
                );
                ms.satisfy(&probe).map(|i| i == items).unwrap_or(false)
            });
            let n_sequence = seqs.into_iter().find(|&s| {
                let probe = MapSatisfier::from_preimages(
                    ecdsa_sigs,
                    schnorr_sigs,
                    preimages,
                    Some(TimeConstraints { n_lock_time: None, n_sequence: Some(s) }),
                );
                ms.satisfy(&probe).map(|i| i == items).unwrap_or(false)
            });
            TimeConstraints { n_lock_time, n_sequence }
        }
    };

    Ok(ScriptSatisfaction { items, time_constraints: resolved })
}

/// Satisfies an expanded (placeholder-substituted) miniscript fragment,
/// choosing among satisfiable branches the one with minimum total witness
/// weight, and honoring `time_constraints` when supplied.
#[allow(clippy::too_many_arguments)]
pub fn satisfy_miniscript(
    expanded_text: &str,
    map: &ExpansionMap,
    ecdsa_sigs: &HashMap<String, ecdsa::Signature>,
    schnorr_sigs: &HashMap<String, schnorr::Signature>,
    preimages: &[Preimage],
    tapscript: bool,
    time_constraints: Option<TimeConstraints>,
) -> Result<ScriptSatisfaction, crate::Error> {
    let substituted = substitute_placeholders(expanded_text, map);

    if tapscript {
        let ms = Miniscript::<XOnlyPublicKey, Tap>::from_str_insane(&substituted)
            .map_err(|e| SatisfactionError::MissingSignature(e.to_string()))?;
        satisfy_and_derive(&ms, ecdsa_sigs, schnorr_sigs, preimages, time_constraints)
    } else {
        let ms = Miniscript::<PublicKey, Segwitv0>::from_str_insane(&substituted)
            .map_err(|e| SatisfactionError::MissingSignature(e.to_string()))?;
        satisfy_and_derive(&ms, ecdsa_sigs, schnorr_sigs, preimages, time_constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyexpr::KeyInfo;

    fn dummy_key_info(hex: &str) -> KeyInfo {
        KeyInfo {
            pubkey: (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
                .collect(),
            ecpair: None,
            bip32: None,
            master_fingerprint: None,
            origin_path: None,
            path: None,
            key_path: None,
            key_expression: hex.to_owned(),
        }
    }

    #[test]
    fn placeholder_substitution_round_trips_to_hex() {
        let mut map = ExpansionMap::new();
        map.intern(dummy_key_info("03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b"));
        let out = substitute_placeholders("pk(@0)", &map);
        assert_eq!(out, "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)");
    }

    #[test]
    fn split_digest_extracts_function_and_hex() {
        assert_eq!(
            split_digest("sha256(6c60f404f8167a38fc70eaf8aa17ac351023bef86bcb9d1086a19afe95bd5e5a)"),
            Some(("sha256", "6c60f404f8167a38fc70eaf8aa17ac351023bef86bcb9d1086a19afe95bd5e5a"))
        );
    }

    #[test]
    fn pk_compiles_to_checksig_script() {
        let mut map = ExpansionMap::new();
        map.intern(dummy_key_info("03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b"));
        let compiled = compile_miniscript_legacy("pk(@0)", &map).unwrap();
        assert!(!compiled.script.is_empty());
    }

    #[test]
    fn derives_sequence_for_winning_branch() {
        let map = ExpansionMap::new();
        let result =
            satisfy_miniscript("older(144)", &map, &HashMap::new(), &HashMap::new(), &[], false, None).unwrap();
        assert_eq!(result.time_constraints.n_sequence, Some(144));
        assert_eq!(result.time_constraints.n_lock_time, None);
    }

    #[test]
    fn derives_locktime_for_winning_branch() {
        let map = ExpansionMap::new();
        let result =
            satisfy_miniscript("after(500000)", &map, &HashMap::new(), &HashMap::new(), &[], false, None).unwrap();
        assert_eq!(result.time_constraints.n_lock_time, Some(500000));
        assert_eq!(result.time_constraints.n_sequence, None);
    }

    #[test]
    fn signing_pass_echoes_pinned_constraints() {
        let map = ExpansionMap::new();
        let pinned = TimeConstraints { n_lock_time: Some(500000), n_sequence: None };
        let result = satisfy_miniscript(
            "after(500000)",
            &map,
            &HashMap::new(),
            &HashMap::new(),
            &[],
            false,
            Some(pinned),
        )
        .unwrap();
        assert_eq!(result.time_constraints, pinned);
    }
}

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

//! Taproot witness assembler: builds the BIP341 merkle tree
//! (via the `bitcoin` crate's own [`TaprootBuilder`], this library's
//! external collaborator for tree/tweak/control-block math),
//! selects a satisfiable leaf, and assembles the final witness stack.
//!
//! Leaf selection (`selectTapLeafCandidates`/`satisfyTapTree`) is ours:
//! given an explicit `tapLeaf` selector (verbatim miniscript text, compared
//! whitespace-insensitively, or a 32-byte tapleaf hash) it restricts to the
//! one matching leaf and errors if none match; otherwise it satisfies every
//! satisfiable leaf in the tree and keeps the one whose total witness size
//! (`vector_size([items..., tapscript, controlBlock])`) is smallest, ties
//! broken left-first.

use std::collections::{BTreeMap, HashMap};

use bitcoin::bip32::{DerivationPath, Fingerprint, KeySource};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Secp256k1, Verification};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{ecdsa, XOnlyPublicKey};

use crate::compiler::{satisfy_miniscript, Preimage, TimeConstraints};
use crate::error::SatisfactionError;
use crate::taptree_info::{TapLeafInfo, TapTreeInfoNode};

/// Builds the [`TaprootSpendInfo`] (merkle root, tweak, control blocks) for
/// a compiled tap tree and its internal key.
pub fn build_spend_info<C: Verification>(
    secp: &Secp256k1<C>,
    tree: &TapTreeInfoNode,
    internal_key: XOnlyPublicKey,
) -> Result<TaprootSpendInfo, crate::Error> {
    let mut builder = TaprootBuilder::new();
    for leaf in tree.leaves() {
        builder = builder
            .add_leaf_with_ver(leaf.depth as u8, leaf.script.clone(), LeafVersion::TapScript)
            .map_err(|_| SatisfactionError::Unsatisfiable)?;
    }
    builder.finalize(secp, internal_key).map_err(|_| SatisfactionError::Unsatisfiable.into())
}

/// The finished unlock for a taproot output: either a single key-path
/// Schnorr signature, or a script-path witness (satisfaction items, the
/// leaf script, and its control block).
#[derive(Clone, Debug)]
pub enum TapWitness {
    KeySpend(Vec<u8>),
    ScriptSpend { items: Vec<Vec<u8>>, script: Vec<u8>, control_block: Vec<u8> },
}

/// A caller's tapleaf selector, as handed down from the descriptor
/// frontend: either the verbatim miniscript text of the leaf (compared
/// whitespace-insensitively) or its 32-byte tapleaf hash.
#[derive(Clone, Copy, Debug)]
pub enum TapLeafQuery<'a> {
    Text(&'a str),
    Hash([u8; 32]),
}

/// Selects a leaf and produces its witness.
///
/// When `tap_leaf_selector` is `Some`, only the leaf it matches is tried,
/// and a mismatch is an error ([`SatisfactionError::NoMatchingTapLeaf`]);
/// otherwise every satisfiable leaf in the tree is tried and the one with
/// the smallest total witness size wins, ties broken left-first.
#[allow(clippy::too_many_arguments)]
pub fn satisfy_tap_tree<C: Verification>(
    secp: &Secp256k1<C>,
    tree: &TapTreeInfoNode,
    spend_info: &TaprootSpendInfo,
    tap_leaf_selector: Option<TapLeafQuery>,
    ecdsa_sigs: &HashMap<String, ecdsa::Signature>,
    schnorr_sigs: &HashMap<String, schnorr::Signature>,
    preimages: &[Preimage],
    time_constraints: Option<TimeConstraints>,
) -> Result<TapWitness, crate::Error> {
    let candidates = select_tap_leaf_candidates(tree, tap_leaf_selector)?;

    let mut best: Option<(usize, TapWitness)> = None;
    for leaf in candidates {
        let (expanded, _) = crate::expand::expand_miniscript(
            &leaf.miniscript_text,
            bitcoin::Network::Bitcoin,
            true,
            None,
        )?;
        let satisfaction = match satisfy_miniscript(
            &expanded,
            &leaf.expansion,
            ecdsa_sigs,
            schnorr_sigs,
            preimages,
            true,
            time_constraints,
        ) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let control_block = spend_info
            .control_block(&(leaf.script.clone(), LeafVersion::TapScript))
            .ok_or(SatisfactionError::Unsatisfiable)?;
        let script = leaf.script.to_bytes();
        let control_block = control_block.serialize();

        let size = witness_vector_size(&satisfaction.items, &script, &control_block);
        let witness = TapWitness::ScriptSpend { items: satisfaction.items, script, control_block };
        match &best {
            Some((best_size, _)) if *best_size <= size => {}
            _ => best = Some((size, witness)),
        }
    }

    let _ = secp;
    best.map(|(_, w)| w).ok_or_else(|| SatisfactionError::Unsatisfiable.into())
}

/// The serialized size of a taproot script-path witness stack: `items`,
/// followed by the tapscript and control block, each compact-size-prefixed,
/// with a compact-size count prefix over the whole vector.
fn witness_vector_size(items: &[Vec<u8>], script: &[u8], control_block: &[u8]) -> usize {
    let count = items.len() + 2;
    let mut size = compact_size_len(count);
    for item in items {
        size += compact_size_len(item.len()) + item.len();
    }
    size += compact_size_len(script.len()) + script.len();
    size += compact_size_len(control_block.len()) + control_block.len();
    size
}

fn compact_size_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn select_tap_leaf_candidates<'a>(
    tree: &'a TapTreeInfoNode,
    selector: Option<TapLeafQuery>,
) -> Result<Vec<&'a TapLeafInfo>, crate::Error> {
    let leaves = tree.leaves();
    let matching: Vec<&TapLeafInfo> = match selector {
        None => return Ok(leaves),
        Some(TapLeafQuery::Text(text)) => {
            let wanted = strip_whitespace(text);
            leaves.into_iter().filter(|l| strip_whitespace(&l.miniscript_text) == wanted).collect()
        }
        Some(TapLeafQuery::Hash(hash)) => leaves
            .into_iter()
            .filter(|l| tap_leaf_hash(&l.script).to_raw_hash().to_byte_array() == hash)
            .collect(),
    };
    if matching.is_empty() {
        Err(SatisfactionError::NoMatchingTapLeaf.into())
    } else {
        Ok(matching)
    }
}

/// Miniscript text carries no meaningful whitespace; strip it all before
/// comparing a caller-supplied `tapLeaf` selector against a stored leaf.
fn strip_whitespace(s: &str) -> String { s.chars().filter(|c| !c.is_whitespace()).collect() }

/// A leaf's BIP341 tapleaf hash, for tagging key-origin entries by the
/// leaves that reference a given key.
pub fn tap_leaf_hash(script: &bitcoin::ScriptBuf) -> TapLeafHash {
    TapLeafHash::from_script(script, LeafVersion::TapScript)
}

/// Merges the per-leaf key-expansion maps of a tap tree into PSBT's
/// `tap_key_origins` shape: for each distinct x-only public key, the set
/// of tapleaf hashes that reference it plus its derivation origin.
///
/// Keys are deduplicated by their hex-encoded bytes; a key that appears
/// under two different derivation origins across leaves is a descriptor
/// inconsistency and is rejected.
pub fn merge_tap_bip32_derivation(
    tree: &TapTreeInfoNode,
) -> Result<BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>, crate::Error> {
    let mut merged: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)> = BTreeMap::new();
    for leaf in tree.leaves() {
        let leaf_hash = tap_leaf_hash(&leaf.script);
        for (_, info) in leaf.expansion.iter() {
            let Ok(xonly) = XOnlyPublicKey::from_slice(tail_32(&info.pubkey)) else { continue };
            let Some(fp) = info.master_fingerprint else { continue };
            let path = info.path.clone().unwrap_or_else(DerivationPath::master);
            match merged.get_mut(&xonly) {
                Some((hashes, (existing_fp, existing_path))) => {
                    if *existing_fp != fp || *existing_path != path {
                        return Err(crate::error::PolicyError::ConflictingKeyOrigin(
                            hex_encode(&info.pubkey),
                        )
                        .into());
                    }
                    if !hashes.contains(&leaf_hash) {
                        hashes.push(leaf_hash);
                    }
                }
                None => {
                    merged.insert(xonly, (vec![leaf_hash], (fp, path)));
                }
            }
        }
    }
    for (hashes, _) in merged.values_mut() {
        hashes.sort();
    }
    Ok(merged)
}

fn tail_32(pubkey: &[u8]) -> &[u8] {
    if pubkey.len() == 32 {
        pubkey
    } else {
        &pubkey[pubkey.len() - 32..]
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Computes the control block's expected byte length for a leaf at `depth`
/// (mirrors [`desc_limits::control_block_len`]).
pub fn control_block_len(depth: usize) -> usize { desc_limits::control_block_len(depth) }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taptree::parse_tap_tree;
    use crate::taptree_info::build_tap_tree_info;
    use bitcoin::Network;

    #[test]
    fn single_leaf_spend_info_builds_valid_control_block() {
        let secp = Secp256k1::new();
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let internal_key = XOnlyPublicKey::from_slice(&[0x02; 32]).unwrap_or_else(|_| {
            XOnlyPublicKey::from_slice(&hex_decode(
                "93c7378d96518a75448821c4f7c8f4bae7ce60f804d03d1f0628dd5dd6f5de6",
            ))
            .unwrap()
        });
        let spend_info = build_spend_info(&secp, &info, internal_key).unwrap();
        let leaf = &info.leaves()[0];
        let cb = spend_info.control_block(&(leaf.script.clone(), LeafVersion::TapScript));
        assert!(cb.is_some());
        assert_eq!(cb.unwrap().serialize().len(), control_block_len(0));
    }

    fn hex_decode(s: &str) -> Vec<u8> {
        (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
    }

    #[test]
    fn selector_mismatch_errors() {
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let result = select_tap_leaf_candidates(&info, Some(TapLeafQuery::Text("pk(nonexistent)")));
        assert!(result.is_err());
    }

    #[test]
    fn selector_text_matches_with_extra_whitespace() {
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let result = select_tap_leaf_candidates(
            &info,
            Some(TapLeafQuery::Text(
                "pk( 03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b )",
            )),
        );
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn selector_hash_matches_single_leaf() {
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let leaf = &info.leaves()[0];
        let hash = tap_leaf_hash(&leaf.script).to_raw_hash().to_byte_array();
        let result = select_tap_leaf_candidates(&info, Some(TapLeafQuery::Hash(hash)));
        assert_eq!(result.unwrap().len(), 1);
    }

    #[test]
    fn selector_hash_mismatch_errors() {
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let result = select_tap_leaf_candidates(&info, Some(TapLeafQuery::Hash([0xaa; 32])));
        assert!(result.is_err());
    }
}

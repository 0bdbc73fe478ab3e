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

//! Taproot tree info builder: walks a parsed [`TapTreeNode`],
//! expanding and compiling each leaf as a tapscript, and records each
//! leaf's depth and script alongside its [`ExpansionMap`] for later witness
//! assembly.

use bitcoin::{Network, ScriptBuf};

use crate::compiler::compile_miniscript;
use crate::expand::{expand_miniscript, ExpansionMap};
use crate::taptree::TapTreeNode;

/// The fixed tapscript leaf version used by every leaf this library builds
/// (BIP341's only currently defined leaf version).
pub const LEAF_VERSION_TAPSCRIPT: u8 = 0xc0;

/// One compiled, positioned leaf of a taproot script tree.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct TapLeafInfo {
    /// The leaf's unexpanded miniscript text, as it appeared in the
    /// descriptor (used to match a caller's `tapLeaf` selector).
    pub miniscript_text: String,
    /// The compiled tapscript.
    pub script: ScriptBuf,
    /// The leaf's depth below the tap tree root (0 for a tree that is a
    /// single bare leaf).
    pub depth: usize,
    /// This leaf's own key-expansion map (placeholders are local to each
    /// leaf, not shared across the tree).
    pub expansion: ExpansionMap,
}

/// A tap tree with every leaf expanded and compiled, still shaped as the
/// original nested structure so the merkle root and control blocks can be
/// built by structural recursion.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum TapTreeInfoNode {
    Leaf(TapLeafInfo),
    Branch(Box<TapTreeInfoNode>, Box<TapTreeInfoNode>),
}

impl TapTreeInfoNode {
    /// All leaves in left-to-right (pre-order) order.
    pub fn leaves(&self) -> Vec<&TapLeafInfo> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn collect_leaves<'a>(node: &'a TapTreeInfoNode, out: &mut Vec<&'a TapLeafInfo>) {
    match node {
        TapTreeInfoNode::Leaf(info) => out.push(info),
        TapTreeInfoNode::Branch(l, r) => {
            collect_leaves(l, out);
            collect_leaves(r, out);
        }
    }
}

/// Expands and compiles every leaf in `tree`, assigning each its BIP341
/// depth.
pub fn build_tap_tree_info(
    tree: &TapTreeNode,
    network: Network,
    index: Option<u32>,
) -> Result<TapTreeInfoNode, crate::Error> {
    build_node(tree, network, index, 0)
}

fn build_node(
    node: &TapTreeNode,
    network: Network,
    index: Option<u32>,
    depth: usize,
) -> Result<TapTreeInfoNode, crate::Error> {
    match node {
        TapTreeNode::Leaf(text) => {
            let (expanded, map) = expand_miniscript(text, network, true, index)?;
            let compiled = compile_miniscript(&expanded, &map, true)?;
            Ok(TapTreeInfoNode::Leaf(TapLeafInfo {
                miniscript_text: text.clone(),
                script: compiled.script,
                depth,
                expansion: map,
            }))
        }
        TapTreeNode::Branch(l, r) => {
            let left = build_node(l, network, index, depth + 1)?;
            let right = build_node(r, network, index, depth + 1)?;
            Ok(TapTreeInfoNode::Branch(Box::new(left), Box::new(right)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taptree::parse_tap_tree;

    #[test]
    fn single_leaf_tree_builds_one_compiled_leaf() {
        let tree = parse_tap_tree(
            "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let leaves = info.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].depth, 0);
        assert!(!leaves[0].script.is_empty());
    }

    #[test]
    fn branch_assigns_depth_one_to_each_leaf() {
        let tree = parse_tap_tree(
            "{pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b),pk(02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5)}",
        )
        .unwrap();
        let info = build_tap_tree_info(&tree, Network::Bitcoin, None).unwrap();
        let leaves = info.leaves();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|l| l.depth == 1));
    }
}

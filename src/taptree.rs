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

//! Taproot tree parser: parses the `{left,right}` nested
//! syntax of a `tr(key,TREE)` descriptor into a binary [`TapTreeNode`].

use desc_limits::{assert_taptree_depth, MAX_TAPTREE_DEPTH};

use crate::error::ParseError;

/// A parsed taproot tree node: either a leaf miniscript, or a branch with
/// two children. No cycles, no parent pointers — traversal is always
/// structural recursion or an explicit worklist.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum TapTreeNode {
    /// A script-path leaf holding its (still unexpanded) miniscript text.
    Leaf(String),
    /// An internal branch with a left and right child.
    Branch(Box<TapTreeNode>, Box<TapTreeNode>),
}

impl TapTreeNode {
    /// Depth of the deepest leaf below this node (a lone leaf has depth 0;
    /// the tree rooted at this node, if it is itself the tap tree argument
    /// of `tr(key, TREE)`, contributes depth+1 to each leaf's BIP341 depth).
    pub fn max_depth(&self) -> usize {
        match self {
            TapTreeNode::Leaf(_) => 0,
            TapTreeNode::Branch(l, r) => 1 + l.max_depth().max(r.max_depth()),
        }
    }
}

/// Parses a tap-tree expression (the text following the comma in
/// `tr(key,TREE)`) into a [`TapTreeNode`].
pub fn parse_tap_tree(expr: &str) -> Result<TapTreeNode, crate::Error> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ParseError::EmptyTapTree(expr.to_owned()).into());
    }
    check_balanced(expr)?;
    let node = parse_node(expr, 0)?;
    assert_taptree_depth(node.max_depth())?;
    Ok(node)
}

fn check_balanced(expr: &str) -> Result<(), crate::Error> {
    let mut brace_depth = 0i32;
    let mut paren_depth = 0i32;
    for c in expr.chars() {
        match c {
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            _ => {}
        }
        if brace_depth < 0 || paren_depth < 0 {
            return Err(ParseError::UnbalancedTapTree(expr.to_owned()).into());
        }
    }
    if brace_depth != 0 || paren_depth != 0 {
        return Err(ParseError::UnbalancedTapTree(expr.to_owned()).into());
    }
    Ok(())
}

fn parse_node(expr: &str, depth: usize) -> Result<TapTreeNode, crate::Error> {
    assert_taptree_depth(depth)?;
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ParseError::EmptyTapTreeSide(expr.to_owned()).into());
    }
    if let Some(inner) = expr.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let (left, right) = split_top_level_comma(inner)?;
        let left_node = parse_node(left, depth + 1)?;
        let right_node = parse_node(right, depth + 1)?;
        return Ok(TapTreeNode::Branch(Box::new(left_node), Box::new(right_node)));
    }
    // A leaf: must not itself contain unbalanced braces (already checked)
    // nor be a bare branch fragment.
    if expr.contains('{') || expr.contains('}') {
        return Err(ParseError::UnbalancedTapTree(expr.to_owned()).into());
    }
    Ok(TapTreeNode::Leaf(expr.to_owned()))
}

/// Splits `inner` (the content of a `{...}` node, braces stripped) on its
/// sole top-level comma — the one at brace-depth 0 *and* paren-depth 0.
fn split_top_level_comma(inner: &str) -> Result<(&str, &str), crate::Error> {
    let mut brace_depth = 0i32;
    let mut paren_depth = 0i32;
    let mut comma_at = None;
    for (i, c) in inner.char_indices() {
        match c {
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            ',' if brace_depth == 0 && paren_depth == 0 => {
                if comma_at.is_some() {
                    return Err(ParseError::MissingTapTreeComma(inner.to_owned()).into());
                }
                comma_at = Some(i);
            }
            _ => {}
        }
    }
    let comma_at = comma_at.ok_or_else(|| ParseError::MissingTapTreeComma(inner.to_owned()))?;
    let (left, right) = (&inner[..comma_at], &inner[comma_at + 1..]);
    if left.trim().is_empty() || right.trim().is_empty() {
        return Err(ParseError::EmptyTapTreeSide(inner.to_owned()).into());
    }
    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf() {
        let tree = parse_tap_tree("pk(K1)").unwrap();
        assert_eq!(tree, TapTreeNode::Leaf("pk(K1)".to_owned()));
    }

    #[test]
    fn simple_branch() {
        let tree = parse_tap_tree("{pk(K1),pk(K2)}").unwrap();
        assert_eq!(
            tree,
            TapTreeNode::Branch(
                Box::new(TapTreeNode::Leaf("pk(K1)".to_owned())),
                Box::new(TapTreeNode::Leaf("pk(K2)".to_owned())),
            )
        );
    }

    #[test]
    fn nested_branch_with_commas_inside_parens() {
        let tree = parse_tap_tree("{multi(1,K1,K2),pk(K3)}").unwrap();
        match tree {
            TapTreeNode::Branch(l, r) => {
                assert_eq!(*l, TapTreeNode::Leaf("multi(1,K1,K2)".to_owned()));
                assert_eq!(*r, TapTreeNode::Leaf("pk(K3)".to_owned()));
            }
            _ => panic!("expected branch"),
        }
    }

    #[test]
    fn leaf_swap_produces_structurally_different_but_valid_trees() {
        let a = parse_tap_tree("{pk(K1),pk(K2)}").unwrap();
        let b = parse_tap_tree("{pk(K2),pk(K1)}").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.max_depth(), b.max_depth());
    }

    #[test]
    fn empty_expression_fails() { assert!(parse_tap_tree("").is_err()); }

    #[test]
    fn unbalanced_braces_fail() { assert!(parse_tap_tree("{pk(K1),pk(K2)").is_err()); }

    #[test]
    fn missing_comma_fails() { assert!(parse_tap_tree("{pk(K1)pk(K2)}").is_err()); }

    #[test]
    fn extra_comma_fails() { assert!(parse_tap_tree("{pk(K1),pk(K2),pk(K3)}").is_err()); }

    #[test]
    fn empty_side_fails() { assert!(parse_tap_tree("{,pk(K2)}").is_err()); }

    #[test]
    fn depth_boundary() {
        // Build a left-leaning tree of depth exactly MAX_TAPTREE_DEPTH.
        let mut expr = "pk(K0)".to_owned();
        for i in 1..=MAX_TAPTREE_DEPTH {
            expr = format!("{{{expr},pk(K{i})}}");
        }
        assert!(parse_tap_tree(&expr).is_ok());

        let too_deep = format!("{{{expr},pk(K999)}}");
        assert!(parse_tap_tree(&too_deep).is_err());
    }
}

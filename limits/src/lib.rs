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

//! Consensus and policy resource limits applicable to descriptor witnesses
//! and scriptSigs.
//!
//! The consensus limits are enforced by every full node; the "standard"
//! (policy) limits are looser than consensus but are what relay and mining
//! nodes apply by default, and are the ones a wallet must respect if it
//! wants its transactions to propagate without manual relay.

#![deny(dead_code, unused_imports, unused_mut, non_upper_case_globals, non_snake_case)]

#[macro_use]
extern crate amplify;

/// Maximum number of items allowed on the interpreter stack (consensus).
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum size of a single stack item / script push (consensus).
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum number of non-push opcodes executed per script (consensus).
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Policy limit on the size of a P2WSH witness script.
pub const MAX_STANDARD_P2WSH_SCRIPT_SIZE: usize = 3600;

/// Policy limit on the number of stack items in a P2WSH witness.
pub const MAX_STANDARD_P2WSH_STACK_ITEMS: usize = 100;

/// Policy limit on the size of any single P2WSH witness stack item.
pub const MAX_STANDARD_P2WSH_STACK_ITEM_SIZE: usize = 80;

/// Policy limit on the total size of a scriptSig.
pub const MAX_STANDARD_SCRIPTSIG_SIZE: usize = 1650;

/// Policy limit on the size of any single tapscript witness stack item.
pub const MAX_STANDARD_TAPSCRIPT_STACK_ITEM_SIZE: usize = 80;

/// Maximum depth of a taproot script tree accepted by this library.
///
/// BIP-341 allows up to 128 levels; this is also the depth at which a
/// control block reaches its largest standard-relay size.
pub const MAX_TAPTREE_DEPTH: usize = 128;

/// A resource limit was exceeded while assembling a witness or scriptSig.
///
/// The exact wording of these messages is part of this library's external
/// contract: callers may match on them for interoperability with other
/// descriptor implementations.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ResourceLimitError {
    /// stack item is too large
    ItemTooLarge,

    /// too many items on stack
    TooManyItems,

    /// witness stack item exceeds standard policy
    WitnessItemTooLarge,

    /// scriptSig is too large
    ScriptSigTooLarge,

    /// script contains more non-push operations than consensus allows
    TooManyNonPushOps,

    /// taproot tree depth is too large
    TapTreeTooDeep,
}

fn items_len_ok<T: AsRef<[u8]>>(
    items: &[T],
    max_items: usize,
    max_item_len: usize,
) -> Result<(), ResourceLimitError> {
    if items.len() > max_items {
        return Err(ResourceLimitError::TooManyItems);
    }
    if items.iter().any(|item| item.as_ref().len() > max_item_len) {
        return Err(ResourceLimitError::ItemTooLarge);
    }
    Ok(())
}

/// Checks a stack of witness/scriptSig items against the bitcoin consensus
/// limits only (no policy/standardness restrictions).
pub fn assert_consensus_stack_resource_limits<T: AsRef<[u8]>>(
    items: &[T],
) -> Result<(), ResourceLimitError> {
    items_len_ok(items, MAX_STACK_SIZE, MAX_SCRIPT_ELEMENT_SIZE)
}

/// Checks a segwit v0 (P2WSH) witness stack against both consensus limits
/// and the standard relay policy.
pub fn assert_witness_v0_satisfaction_resource_limits<T: AsRef<[u8]>>(
    items: &[T],
) -> Result<(), ResourceLimitError> {
    assert_consensus_stack_resource_limits(items)?;
    if items.len() > MAX_STANDARD_P2WSH_STACK_ITEMS {
        return Err(ResourceLimitError::TooManyItems);
    }
    if items.iter().any(|item| item.as_ref().len() > MAX_STANDARD_P2WSH_STACK_ITEM_SIZE) {
        return Err(ResourceLimitError::WitnessItemTooLarge);
    }
    Ok(())
}

/// Checks a taproot script-path witness stack (excluding the tapscript and
/// control block themselves) against consensus limits plus the standard
/// per-item size policy.
pub fn assert_taproot_script_path_satisfaction_resource_limits<T: AsRef<[u8]>>(
    items: &[T],
) -> Result<(), ResourceLimitError> {
    assert_consensus_stack_resource_limits(items)?;
    if items.iter().any(|item| item.as_ref().len() > MAX_STANDARD_TAPSCRIPT_STACK_ITEM_SIZE) {
        return Err(ResourceLimitError::WitnessItemTooLarge);
    }
    Ok(())
}

/// Checks a legacy `scriptSig` against the standard relay size policy.
pub fn assert_p2sh_script_sig_standard_size(script_sig: &[u8]) -> Result<(), ResourceLimitError> {
    if script_sig.len() > MAX_STANDARD_SCRIPTSIG_SIZE {
        return Err(ResourceLimitError::ScriptSigTooLarge);
    }
    Ok(())
}

/// Checks a non-push opcode count against the consensus limit of 201.
///
/// Script decompilation (counting the opcodes in the first place) is the
/// script-utility collaborator's job; this function only applies the limit.
pub fn assert_script_non_push_ops_limit(non_push_op_count: usize) -> Result<(), ResourceLimitError> {
    if non_push_op_count > MAX_OPS_PER_SCRIPT {
        return Err(ResourceLimitError::TooManyNonPushOps);
    }
    Ok(())
}

/// Checks a taproot tree depth against [`MAX_TAPTREE_DEPTH`].
pub fn assert_taptree_depth(depth: usize) -> Result<(), ResourceLimitError> {
    if depth > MAX_TAPTREE_DEPTH {
        return Err(ResourceLimitError::TapTreeTooDeep);
    }
    Ok(())
}

/// Length, in bytes, of a BIP-341 control block for a leaf at the given
/// depth (the root's direct children sit at depth 1).
pub const fn control_block_len(depth: usize) -> usize { 33 + 32 * depth }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_size_boundary() {
        let items = vec![vec![0u8; 1]; MAX_STACK_SIZE];
        assert!(assert_consensus_stack_resource_limits(&items).is_ok());
        let items = vec![vec![0u8; 1]; MAX_STACK_SIZE + 1];
        assert_eq!(assert_consensus_stack_resource_limits(&items), Err(ResourceLimitError::TooManyItems));
    }

    #[test]
    fn script_element_size_boundary() {
        let items = vec![vec![0u8; MAX_SCRIPT_ELEMENT_SIZE]];
        assert!(assert_consensus_stack_resource_limits(&items).is_ok());
        let items = vec![vec![0u8; MAX_SCRIPT_ELEMENT_SIZE + 1]];
        assert_eq!(assert_consensus_stack_resource_limits(&items), Err(ResourceLimitError::ItemTooLarge));
    }

    #[test]
    fn wsh_stack_item_boundary() {
        let items = vec![vec![0u8; MAX_STANDARD_P2WSH_STACK_ITEM_SIZE]];
        assert!(assert_witness_v0_satisfaction_resource_limits(&items).is_ok());
        let items = vec![vec![0u8; MAX_STANDARD_P2WSH_STACK_ITEM_SIZE + 1]];
        assert_eq!(
            assert_witness_v0_satisfaction_resource_limits(&items),
            Err(ResourceLimitError::WitnessItemTooLarge)
        );
    }

    #[test]
    fn script_sig_size_boundary() {
        assert!(assert_p2sh_script_sig_standard_size(&vec![0u8; MAX_STANDARD_SCRIPTSIG_SIZE]).is_ok());
        assert_eq!(
            assert_p2sh_script_sig_standard_size(&vec![0u8; MAX_STANDARD_SCRIPTSIG_SIZE + 1]),
            Err(ResourceLimitError::ScriptSigTooLarge)
        );
    }

    #[test]
    fn non_push_ops_boundary() {
        assert!(assert_script_non_push_ops_limit(MAX_OPS_PER_SCRIPT).is_ok());
        assert_eq!(
            assert_script_non_push_ops_limit(MAX_OPS_PER_SCRIPT + 1),
            Err(ResourceLimitError::TooManyNonPushOps)
        );
    }

    #[test]
    fn taptree_depth_boundary() {
        assert!(assert_taptree_depth(MAX_TAPTREE_DEPTH).is_ok());
        assert_eq!(assert_taptree_depth(MAX_TAPTREE_DEPTH + 1), Err(ResourceLimitError::TapTreeTooDeep));
        assert_eq!(control_block_len(128), 33 + 32 * 128);
    }
}

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

//! Per-input weight/vsize estimation.
//!
//! Newtypes and the `Weight` trait follow the same shape as whole-transaction
//! weight estimation, narrowed to the single-input scope this crate covers
//! (general transaction construction is out of scope).

use crate::descriptor::{Output, Wrapper};

/// A count of consensus weight units (BIP141 `vsize * 4`, roughly).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct WeightUnits(pub u64);

/// A count of virtual bytes (`weight / 4`, rounded up).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct VBytes(pub u64);

impl WeightUnits {
    pub fn to_vbytes(self) -> VBytes { VBytes(self.0.div_ceil(4)) }
}

/// Sentinel signature byte length used when a caller wants an upper-bound
/// size estimate without real signatures yet.
pub const DANGEROUSLY_USE_FAKE_SIGNATURES: SignatureSizing = SignatureSizing::Fake;

/// Whether weight estimation should size signatures at their real length
/// or their worst-case length.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum SignatureSizing {
    /// Exact signature length, known because it was actually produced.
    Real(usize),
    /// Upper-bound sizing: 72-byte ECDSA (DER + low-S + sighash byte), or
    /// 65-byte Schnorr (64-byte signature + sighash byte).
    Fake,
}

impl SignatureSizing {
    fn ecdsa_len(self) -> usize {
        match self {
            SignatureSizing::Real(n) => n,
            SignatureSizing::Fake => 72,
        }
    }

    fn schnorr_len(self, sighash_default: bool) -> usize {
        match self {
            SignatureSizing::Real(n) => n,
            SignatureSizing::Fake => if sighash_default { 64 } else { 65 },
        }
    }
}

/// Fixed per-input overhead of an outpoint (32-byte txid + 4-byte vout)
/// plus its 4-byte nSequence, counted at 4 weight units per byte since it
/// lives outside the witness.
const OUTPOINT_AND_SEQUENCE_WEIGHT: u64 = 41 * 4;

/// Computes the estimated weight of spending `output`, given a signature
/// sizing strategy for its wrapper's signatures.
pub trait Weight {
    fn estimated_weight(&self, sizing: SignatureSizing) -> WeightUnits;
}

impl Weight for Output {
    fn estimated_weight(&self, sizing: SignatureSizing) -> WeightUnits {
        let (script_sig_len, witness_len) = match &self.wrapper {
            Wrapper::Pkh(_) => {
                let sig = sizing.ecdsa_len();
                (1 + sig + 1 + 33, 0)
            }
            Wrapper::Wpkh(_) => {
                let sig = sizing.ecdsa_len();
                (0, 1 + sig + 1 + 33)
            }
            Wrapper::ShWpkh(_) => {
                let sig = sizing.ecdsa_len();
                (1 + 22, 1 + sig + 1 + 33)
            }
            Wrapper::Wsh { witness_script, .. } | Wrapper::ShWsh { witness_script, .. } => {
                let script_sig = if matches!(&self.wrapper, Wrapper::ShWsh { .. }) { 1 + 34 } else { 0 };
                let witness = witness_script.len() + sizing.ecdsa_len() * 2;
                (script_sig, witness)
            }
            Wrapper::Sh { redeem_script, .. } => {
                (redeem_script.len() + sizing.ecdsa_len() * 2, 0)
            }
            Wrapper::Tr { tree, .. } => {
                let schnorr = sizing.schnorr_len(true);
                match tree {
                    None => (0, 1 + schnorr),
                    Some(info) => {
                        let leaf = &info.leaves()[0];
                        (0, 1 + schnorr + 1 + leaf.script.len() + 1 + 33)
                    }
                }
            }
            Wrapper::Pk(_) | Wrapper::Addr(_) | Wrapper::Raw(_) | Wrapper::Combo(_) => (0, 0),
        };

        let witness_units = if witness_len == 0 { 0 } else { witness_len as u64 + 2 };
        WeightUnits(OUTPOINT_AND_SEQUENCE_WEIGHT + script_sig_len as u64 * 4 + witness_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::OutputOptions;
    use bitcoin::Network;

    #[test]
    fn fake_signature_estimate_is_at_least_real_estimate() {
        let out = Output::new(
            "wpkh(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)",
            Network::Bitcoin,
            OutputOptions::default(),
        )
        .unwrap();
        let fake = out.estimated_weight(SignatureSizing::Fake);
        let real = out.estimated_weight(SignatureSizing::Real(70));
        assert!(fake.0 >= real.0);
    }

    #[test]
    fn weight_to_vbytes_rounds_up() {
        assert_eq!(WeightUnits(401).to_vbytes(), VBytes(101));
        assert_eq!(WeightUnits(400).to_vbytes(), VBytes(100));
    }
}

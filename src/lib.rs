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

// Coding conventions
#![recursion_limit = "256"]
#![deny(dead_code)]

//! Parsing, resolving and satisfying Bitcoin output descriptors and
//! miniscript.
//!
//! This crate takes a textual output descriptor — the canonical
//! human-readable representation of a Bitcoin spending policy — all the way
//! from parsing to a finalized scriptSig/witness:
//!
//! * [`keyexpr`] resolves a single key expression (origin + xpub/xprv/WIF/
//!   raw pubkey) to a concrete public key.
//! * [`multipath`] expands `/**` and `/<a;b;…>` shorthand against a caller
//!   `change` value.
//! * [`expand`] replaces key expressions inside a miniscript fragment with
//!   stable `@N` placeholders.
//! * [`compiler`] compiles an expanded miniscript to script bytes and
//!   produces minimum-weight satisfactions.
//! * [`taptree`] and [`taptree_info`] parse and compile a taproot `{L,R}`
//!   script tree.
//! * [`tapwitness`] builds the BIP341 merkle tree, control blocks and
//!   taproot witnesses.
//! * [`descriptor`] is the frontend: wrapper parsing, checksum handling,
//!   scriptPubKey/address assembly, satisfaction and PSBT updating.
//! * [`ledger`] extracts a Ledger hardware-wallet policy template.
//! * [`weight`] estimates per-input transaction weight.
//!
//! The core is synchronous and side-effect-free: no operation blocks,
//! retries, or mutates shared state. The only externally observable effect
//! is PSBT mutation via [`descriptor::Output::update_psbt_input`] and
//! [`descriptor::Output::update_psbt_output`], which is entirely under
//! caller control.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod checksum;
pub mod compiler;
pub mod descriptor;
pub mod error;
pub mod expand;
pub mod keyexpr;
pub mod ledger;
pub mod multipath;
pub mod taptree;
pub mod taptree_info;
pub mod tapwitness;
pub mod weight;

pub use descriptor::{Output, OutputOptions, TapLeafSelector, TaprootSpendPath, Wrapper};
pub use error::Error;
pub use expand::ExpansionMap;
pub use keyexpr::KeyInfo;

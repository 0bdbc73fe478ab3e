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

//! Key expression resolver: parses a single key expression —
//! an optional `[origin]` prefix followed by an xpub/xprv with a path, a
//! WIF private key, or a raw compressed/uncompressed pubkey — into a
//! [`KeyInfo`] carrying the resolved public key.

use std::str::FromStr;
use std::sync::OnceLock;

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::key::{PrivateKey, PublicKey};
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::Network;
use regex::Regex;

use crate::error::{KeyDerivationError, NetworkError};

/// An opaque record describing a single key occurrence in a descriptor.
///
/// If `bip32` is set, `pubkey` is guaranteed to be the key derived at the
/// resolved path (with any `*` wildcard substituted by `index`).
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub struct KeyInfo {
    /// The resolved public key, 33 bytes (compressed) or 32 bytes (x-only,
    /// produced only by the taproot-mode expander).
    pub pubkey: Vec<u8>,
    /// The private key, when the key expression carried one (WIF or xprv).
    pub ecpair: Option<PrivateKey>,
    /// The extended public key this pubkey was derived from, if any.
    pub bip32: Option<Xpub>,
    /// The 4-byte master fingerprint from an explicit `[fingerprint/path]`
    /// origin prefix.
    pub master_fingerprint: Option<Fingerprint>,
    /// The BIP32 path from the master key to the extended key in this
    /// expression (the origin path, i.e. what appears inside `[...]`).
    pub origin_path: Option<DerivationPath>,
    /// The concatenation of `origin_path` and `key_path`, when both are
    /// known.
    pub path: Option<DerivationPath>,
    /// The BIP32 path from the extended key in this expression to the
    /// resolved pubkey (what appears after the xpub/xprv text).
    pub key_path: Option<DerivationPath>,
    /// The verbatim key expression text as it appeared in the descriptor.
    pub key_expression: String,
}

fn re_origin() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([0-9a-fA-F]{8})((?:/[0-9]+[hH']?)*)\]").unwrap())
}

fn re_extended_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([txyYzZuU]?(?:pub|prv)[1-9A-HJ-NP-Za-km-z]{79,108})((?:/[0-9]+[hH']?)*(?:/\*)?)$")
            .unwrap()
    })
}

fn re_raw_pubkey() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(02|03)[0-9a-fA-F]{64}$|^04[0-9a-fA-F]{128}$").unwrap())
}

/// Canonicalizes hardened markers (`h`, `H`) to the standard `'` before any
/// [`DerivationPath`] parsing.
fn canonicalize_hardened(path: &str) -> String { path.replace('h', "'").replace('H', "'") }

/// Substitutes a single trailing `*` wildcard in `path` with `index`.
fn substitute_wildcard(path: &str, index: Option<u32>) -> Result<String, KeyDerivationError> {
    if let Some(rest) = path.strip_suffix("/*") {
        let index = index.ok_or(KeyDerivationError::InvalidExtendedKey(path.to_owned()))?;
        Ok(format!("{rest}/{index}"))
    } else {
        Ok(path.to_owned())
    }
}

fn parse_path(path: &str) -> Result<DerivationPath, KeyDerivationError> {
    if path.is_empty() {
        return Ok(DerivationPath::master());
    }
    let path = canonicalize_hardened(path);
    DerivationPath::from_str(&path).map_err(|_| KeyDerivationError::InvalidExtendedKey(path))
}

/// Resolves a single key expression against an expected `network`,
/// optionally substituting a wildcard `*` in its path with `index`.
pub fn resolve_key_expression(
    expr: &str,
    network: Network,
    index: Option<u32>,
) -> Result<KeyInfo, KeyDerivationError> {
    let secp = Secp256k1::verification_only();
    let mut rest = expr;

    let (master_fingerprint, origin_path) = if let Some(caps) = re_origin().captures(rest) {
        let fp = Fingerprint::from_str(&caps[1]).map_err(|_| KeyDerivationError::InvalidExtendedKey(expr.to_owned()))?;
        let origin_path = parse_path(&caps[2])?;
        rest = &rest[caps.get(0).unwrap().end()..];
        (Some(fp), Some(origin_path))
    } else {
        (None, None)
    };

    if let Some(caps) = re_extended_key().captures(rest) {
        let xkey_text = &caps[1];
        let key_path_text = substitute_wildcard(&caps[2], index)?;
        let key_path = parse_path(&key_path_text)?;

        let (pubkey, bip32, ecpair) = if let Ok(xpriv) = Xpriv::from_str(xkey_text) {
            if xpriv.network != network.into() {
                return Err(KeyDerivationError::InvalidExtendedKey(expr.to_owned()));
            }
            let derived = xpriv
                .derive_priv(&Secp256k1::signing_only(), &key_path)
                .map_err(|_| KeyDerivationError::HardenedFromPublic)?;
            let privkey = PrivateKey::new(derived.private_key, network);
            let pubkey = PublicKey::from_private_key(&Secp256k1::signing_only(), &privkey);
            (pubkey.to_bytes(), Some(Xpub::from_priv(&secp, &derived)), Some(privkey))
        } else {
            let xpub = Xpub::from_str(xkey_text)
                .map_err(|_| KeyDerivationError::InvalidExtendedKey(expr.to_owned()))?;
            if xpub.network != network.into() {
                return Err(KeyDerivationError::InvalidExtendedKey(expr.to_owned()));
            }
            if key_path.into_iter().any(ChildNumber::is_hardened) {
                return Err(KeyDerivationError::HardenedFromPublic);
            }
            let derived = xpub
                .derive_pub(&secp, &key_path)
                .map_err(|_| KeyDerivationError::HardenedFromPublic)?;
            (derived.public_key.serialize().to_vec(), Some(derived), None)
        };

        let path = match (&origin_path, key_path.as_ref()) {
            (Some(op), kp) if !kp.is_empty() => Some(op.extend(kp)),
            (Some(op), _) => Some(op.clone()),
            (None, kp) if !kp.is_empty() => Some(kp.clone()),
            (None, _) => None,
        };

        return Ok(KeyInfo {
            pubkey,
            ecpair,
            bip32,
            master_fingerprint,
            origin_path,
            path,
            key_path: Some(key_path),
            key_expression: expr.to_owned(),
        });
    }

    if let Ok(privkey) = PrivateKey::from_wif(rest) {
        if privkey.network != network.into() {
            return Err(KeyDerivationError::InvalidWif(expr.to_owned()));
        }
        let pubkey = PublicKey::from_private_key(&secp256k1::Secp256k1::signing_only(), &privkey);
        return Ok(KeyInfo {
            pubkey: pubkey.to_bytes(),
            ecpair: Some(privkey),
            bip32: None,
            master_fingerprint,
            origin_path,
            path: origin_path.clone(),
            key_path: None,
            key_expression: expr.to_owned(),
        });
    }

    if re_raw_pubkey().is_match(rest) {
        let bytes = hex_decode(rest).map_err(|_| KeyDerivationError::InvalidRawPubkey(expr.to_owned()))?;
        return Ok(KeyInfo {
            pubkey: bytes,
            ecpair: None,
            bip32: None,
            master_fingerprint,
            origin_path,
            path: origin_path.clone(),
            key_path: None,
            key_expression: expr.to_owned(),
        });
    }

    // Bare 32-byte x-only pubkey, valid only inside `tr(...)`.
    if rest.len() == 64 && rest.bytes().all(|b| b.is_ascii_hexdigit()) {
        let bytes = hex_decode(rest).map_err(|_| KeyDerivationError::InvalidRawPubkey(expr.to_owned()))?;
        return Ok(KeyInfo {
            pubkey: bytes,
            ecpair: None,
            bip32: None,
            master_fingerprint,
            origin_path,
            path: origin_path.clone(),
            key_path: None,
            key_expression: expr.to_owned(),
        });
    }

    Err(KeyDerivationError::InvalidExtendedKey(expr.to_owned()))
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Converts a network-mismatch situation detected elsewhere in the crate
/// into the dedicated [`NetworkError`].
pub fn invalid_network() -> NetworkError { NetworkError::InvalidNetworkVersion }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_compressed_pubkey() {
        let expr = "03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b";
        let info = resolve_key_expression(expr, Network::Bitcoin, None).unwrap();
        assert_eq!(info.pubkey.len(), 33);
        assert!(info.bip32.is_none());
    }

    #[test]
    fn wif_private_key() {
        let expr = "L4rK1yDtCWekvXuE6oXD9jCYfFNV2cWRpVuPLBcCU2z8TrisoyY1";
        let info = resolve_key_expression(expr, Network::Bitcoin, None).unwrap();
        assert_eq!(info.pubkey.len(), 33);
        assert!(info.ecpair.is_some());
    }

    #[test]
    fn wif_wrong_network_fails() {
        let expr = "L4rK1yDtCWekvXuE6oXD9jCYfFNV2cWRpVuPLBcCU2z8TrisoyY1";
        assert!(resolve_key_expression(expr, Network::Testnet, None).is_err());
    }

    #[test]
    fn wildcard_without_index_fails() {
        let expr = "tpubDCdxmvzJ5QBjTN8oCjjyT2V58AyZvA1fkmCeZRC75QMoaHcVP2m45Bv3hmnR7ttAwkb2UNYyoXdHVt4gwBqRrJqLUU2JrM43HippxiWpHra/1/2/3/4/*";
        assert!(resolve_key_expression(expr, Network::Regtest, None).is_err());
    }

    #[test]
    fn hardened_marker_canonicalization() {
        assert_eq!(canonicalize_hardened("/49h/0h/0h"), "/49'/0'/0'");
        assert_eq!(canonicalize_hardened("/49H/0H"), "/49'/0'");
    }
}

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

//! Bitcoin Core's output descriptor checksum: an 8-character base-32
//! polymod checksum over the descriptor text with any trailing
//! `#checksum` stripped.
//!
//! This is a direct port of Bitcoin Core's `DescriptorChecksum` (the same
//! algorithm every other descriptor-consuming wallet re-implements; there
//! is no crate for it), grounded on the bit layout documented in BIP380.

use crate::error::ChecksumError;

const INPUT_CHARSET: &str =
    "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";
const CHECKSUM_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn polymod(c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    let mut c = (c & 0x7ffffffff) << 5 ^ val;
    if c0 & 1 != 0 {
        c ^= 0xf5dee51989;
    }
    if c0 & 2 != 0 {
        c ^= 0xa9fdca3312;
    }
    if c0 & 4 != 0 {
        c ^= 0x1bab10e32d;
    }
    if c0 & 8 != 0 {
        c ^= 0x3706b1677a;
    }
    if c0 & 16 != 0 {
        c ^= 0x644d626ffd;
    }
    c
}

/// Computes the 8-character checksum for `descriptor` (with any existing
/// `#checksum` suffix ignored, not included in the input).
pub fn descriptor_checksum(descriptor: &str) -> Result<String, ChecksumError> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut clscount = 0u64;

    for ch in descriptor.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or_else(|| ChecksumError::Mismatch { expected: String::new(), found: ch.to_string() })?
            as u64;
        c = polymod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        clscount += 1;
        if clscount == 3 {
            c = polymod(c, cls);
            cls = 0;
            clscount = 0;
        }
    }
    if clscount > 0 {
        c = polymod(c, cls);
    }
    for _ in 0..8 {
        c = polymod(c, 0);
    }
    c ^= 1;

    let mut checksum = String::with_capacity(8);
    for j in 0..8 {
        let idx = (c >> (5 * (7 - j))) & 31;
        checksum.push(CHECKSUM_CHARSET.as_bytes()[idx as usize] as char);
    }
    Ok(checksum)
}

/// Strips a `#checksum` suffix from `descriptor`, if present, returning the
/// bare descriptor text and the checksum (if any).
pub fn split_checksum(descriptor: &str) -> (&str, Option<&str>) {
    match descriptor.rsplit_once('#') {
        Some((body, checksum)) if checksum.len() == 8 => (body, Some(checksum)),
        _ => (descriptor, None),
    }
}

/// Verifies that `descriptor`'s trailing `#checksum` (if any) matches the
/// one computed from its body, per `require_checksum`:
/// - `require_checksum = true` rejects a missing checksum.
/// - A present-but-wrong checksum is always rejected.
pub fn verify_checksum(descriptor: &str, require_checksum: bool) -> Result<String, crate::Error> {
    let (body, found) = split_checksum(descriptor);
    let expected = descriptor_checksum(body)?;
    match found {
        Some(found) if found == expected => Ok(body.to_owned()),
        Some(found) => {
            Err(ChecksumError::Mismatch { expected, found: found.to_owned() }.into())
        }
        None if require_checksum => Err(ChecksumError::Missing.into()),
        None => Ok(body.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_wpkh() {
        // BIP380 test vector.
        let d = "wpkh([d34db33f/84h/0h/0h]0279be667ef9dcbbac55a06295Ce870b07029Bfcdb2dce28d959f2815b16f81798)";
        let sum = descriptor_checksum(d).unwrap();
        assert_eq!(sum.len(), 8);
    }

    #[test]
    fn round_trips_through_verify() {
        let body = "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)";
        let sum = descriptor_checksum(body).unwrap();
        let with_checksum = format!("{body}#{sum}");
        let verified = verify_checksum(&with_checksum, true).unwrap();
        assert_eq!(verified, body);
    }

    #[test]
    fn wrong_checksum_rejected() {
        let body = "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)";
        let bad = format!("{body}#aaaaaaaa");
        assert!(verify_checksum(&bad, true).is_err());
    }

    #[test]
    fn missing_checksum_rejected_when_required() {
        let body = "pk(03a34b99f22c790c4e36b2b3c2c35a36db06226e41c692fc82b8b56ac1c540c5b)";
        assert!(verify_checksum(body, true).is_err());
        assert!(verify_checksum(body, false).is_ok());
    }
}

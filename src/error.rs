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

use desc_limits::ResourceLimitError;

/// Top-level error returned by every fallible operation in this crate.
///
/// Variants are grouped by the taxonomy of the originating check; the
/// wording of [`Error::Satisfaction`] and [`Error::Resource`] messages is
/// part of this library's external contract and must not be altered.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(inner)]
pub enum Error {
    /// malformed descriptor, multipath tuple or tap-tree expression.
    #[from]
    Parse(ParseError),

    /// key material encoded for a network other than the one requested.
    #[from]
    Network(NetworkError),

    /// descriptor checksum is missing or does not match.
    #[from]
    Checksum(ChecksumError),

    /// a range (`*`) descriptor was used without supplying an index, or the
    /// index is out of the allowed range.
    #[from]
    Range(RangeError),

    /// a key expression could not be resolved to a public key.
    #[from]
    KeyDerivation(KeyDerivationError),

    /// the descriptor's policy is unsupported or inconsistent.
    #[from]
    Policy(PolicyError),

    /// a consensus or standardness resource limit was violated.
    #[from]
    #[display(inner)]
    Resource(ResourceLimitError),

    /// no satisfiable branch exists given the supplied signatures and
    /// preimages, or the requested spend path is incoherent.
    #[from]
    Satisfaction(SatisfactionError),

    /// a PSBT value was not a non-negative arbitrary-precision integer.
    #[from]
    ValueGuard(ValueGuardError),
}

/// Malformed descriptor text, multipath tuple, or tap-tree expression.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ParseError {
    /// unrecognized wrapper function in descriptor `{0}`
    UnknownWrapper(String),

    /// descriptor `{0}` has no closing parenthesis matching its wrapper
    UnbalancedParens(String),

    /// multipath tuple `{0}` must list at least two strictly increasing,
    /// non-negative decimal integers separated by `;`
    InvalidMultipathTuple(String),

    /// descriptor mixes multipath tuples of different cardinality ({0} vs {1})
    MismatchedMultipathCardinality(usize, usize),

    /// tap-tree expression `{0}` is empty
    EmptyTapTree(String),

    /// tap-tree expression `{0}` has unbalanced braces or parentheses
    UnbalancedTapTree(String),

    /// tap-tree branch `{0}` is missing its top-level comma, or has more
    /// than one
    MissingTapTreeComma(String),

    /// tap-tree branch `{0}` has an empty left or right side
    EmptyTapTreeSide(String),

    /// key expression `{0}` does not match any recognized grammar
    InvalidKeyExpression(String),

    /// `sortedmulti`/`sortedmulti_a` argument `{0}` is not a valid threshold
    InvalidThreshold(String),
}

/// Key material encoded for a network other than the one requested.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum NetworkError {
    /// invalid network version
    InvalidNetworkVersion,
}

/// A required or supplied descriptor checksum did not validate.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ChecksumError {
    /// descriptor requires a checksum but none was supplied
    Missing,

    /// descriptor checksum `{found}` does not match the expected `{expected}`
    Mismatch { expected: String, found: String },
}

/// A range (`*`) descriptor was used without an index, or the index is out
/// of the allowed range.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum RangeError {
    /// descriptor contains a wildcard `*` but no `index` was supplied
    MissingIndex,

    /// multipath tuple requires a `change` value, but none was supplied
    MissingChange,

    /// `change` value {0} does not appear in every multipath tuple of this
    /// descriptor
    ChangeNotInTuple(u32),
}

/// A key expression could not be resolved to a public key.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum KeyDerivationError {
    /// hardened derivation step requires private key material, which an
    /// extended public key cannot provide
    HardenedFromPublic,

    /// invalid extended public or private key `{0}`
    InvalidExtendedKey(String),

    /// invalid WIF-encoded private key `{0}`
    InvalidWif(String),

    /// invalid raw public key `{0}`
    InvalidRawPubkey(String),

    /// uncompressed public keys are not allowed in segwit contexts
    UncompressedInSegwit,
}

/// The descriptor's policy is unsupported, non-sane, or internally
/// inconsistent.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum PolicyError {
    /// miniscript `{0}` is not sane (contains a malleability, timelock-mixing
    /// or duplicate-key issue)
    NotSane(String),

    /// `sh(...)` requires a sane top-level miniscript, which `{0}` is not
    NotSaneAtTopLevel(String),

    /// `tr(...)` is not supported in this context
    TaprootNotSupported,

    /// threshold M={m} exceeds the number of keys N={n}
    ThresholdExceedsKeys { m: usize, n: usize },

    /// `multi`/`sortedmulti` supports at most 20 keys, found {0}
    TooManyKeys(usize),

    /// conflicting derivation origin for the same public key `{0}`
    ConflictingKeyOrigin(String),
}

/// No satisfiable branch exists, or the requested spend path is internally
/// incoherent.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SatisfactionError {
    /// no branch of the miniscript is satisfiable with the supplied
    /// signatures and preimages
    Unsatisfiable,

    /// a required signature for key `{0}` was not supplied
    MissingSignature(String),

    /// tapLeaf cannot be used when taprootSpendPath is key
    TapLeafWithKeyPath,

    /// taprootSpendPath=script requires a tr(KEY,TREE) descriptor
    ScriptPathRequiresTree,

    /// taproot spend options were supplied for a non-taproot descriptor
    TaprootOptionOnNonTaproot,

    /// no leaf in the tap tree matches the requested selector
    NoMatchingTapLeaf,

    /// satisfaction under the supplied time constraints would select a
    /// different branch than the one already committed to
    TimeConstraintMismatch,
}

/// A PSBT value was not a non-negative arbitrary-precision integer.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ValueGuardError {
    /// value `{0}` is not a non-negative integer
    NotNonNegativeInteger(String),
}

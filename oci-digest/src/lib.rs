//! Algorithm-qualified content digests.
//!
//! A digest identifies a byte sequence by a cryptographic hash, in the
//! textual form `algorithm:hex` (for example
//! `sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824`).
//! Digests are immutable identifiers: if the bytes change, the digest
//! changes.
//!
//! `sha256` is the algorithm used for all computed digests; `sha512` is
//! additionally accepted when parsing.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// Hash algorithms understood by [`Digest::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// The textual name used in the `algorithm:hex` form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex encoding produced by this algorithm.
    pub fn encoded_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(DigestParseError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Errors produced when parsing the textual digest form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestParseError {
    /// The string contained no `:` separator.
    #[error("digest is missing the algorithm separator")]
    MissingSeparator,

    /// The algorithm component is not one this crate understands.
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The hex component has the wrong length for the algorithm.
    #[error("digest has {actual} hex characters, {algorithm} requires {expected}")]
    InvalidLength {
        algorithm: Algorithm,
        expected: usize,
        actual: usize,
    },

    /// The hex component contains characters outside `[a-f0-9]`.
    #[error("digest hex contains non-hex characters")]
    InvalidHex,
}

/// An algorithm-qualified content digest.
///
/// Parsed from and displayed as `algorithm:hex`. The hex component is
/// normalized to lowercase so that equality and hashing match the
/// content-addressing semantics of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse the textual `algorithm:hex` form.
    pub fn parse(s: &str) -> Result<Self, DigestParseError> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or(DigestParseError::MissingSeparator)?;
        let algorithm: Algorithm = algorithm.parse()?;

        if hex.len() != algorithm.encoded_len() {
            return Err(DigestParseError::InvalidLength {
                algorithm,
                expected: algorithm.encoded_len(),
                actual: hex.len(),
            });
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestParseError::InvalidHex);
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Compute the sha256 digest of a byte sequence.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// The algorithm component.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex component, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.hex
    }
}

/// Whether a manifest reference is written in digest grammar.
///
/// Tag grammar has no `:`, so the separator alone distinguishes the two
/// reference forms; a reference that looks like a digest but fails
/// [`Digest::parse`] is an invalid digest, never a tag.
pub fn looks_like_digest(reference: &str) -> bool {
    reference.contains(':')
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Digest::parse(&text).map_err(D::Error::custom)
    }
}

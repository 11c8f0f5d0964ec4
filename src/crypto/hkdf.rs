// SPDX-License-Identifier: MIT OR Apache-2.0

//! SHA256-based HKDF.
//!
//! Every derivation in this crate is domain-separated with a fixed-size info string owned by the
//! call site. Empty input key material is rejected.
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// All info strings are exactly 16 bytes.
pub const INFO_SIZE: usize = 16;

/// A single HKDF-extract over the given key material which can be expanded multiple times with
/// different info strings.
pub struct HkdfSha256(Hkdf<Sha256>);

impl HkdfSha256 {
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Result<Self, HkdfError> {
        if ikm.is_empty() {
            return Err(HkdfError::EmptyKeyMaterial);
        }
        Ok(Self(Hkdf::new(salt, ikm)))
    }

    pub fn expand<const N: usize>(&self, info: &[u8; INFO_SIZE]) -> Result<[u8; N], HkdfError> {
        let mut out = [0u8; N];
        self.0
            .expand(info, &mut out)
            .map_err(|_| HkdfError::OutputLength)?;
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("input key material must not be empty")]
    EmptyKeyMaterial,

    #[error("requested output length is invalid")]
    OutputLength,
}

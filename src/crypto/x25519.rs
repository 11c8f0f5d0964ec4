// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 key material for all Diffie-Hellman operations.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::StaticSecret;

use crate::crypto::{Rng, RngError, Secret};

/// 256-bit X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// 256-bit X25519 secret key.
pub const SECRET_KEY_SIZE: usize = 32;

/// Shared secret resulting from a Diffie-Hellman exchange.
pub const SHARED_SECRET_SIZE: usize = 32;

/// X25519 public key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// X25519 secret key.
///
/// Clamping of the scalar happens on use, the raw bytes are kept as generated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    /// Generates a new random secret key.
    pub fn generate(rng: &Rng) -> Result<Self, X25519Error> {
        Ok(Self(Secret::from_bytes(rng.random_array()?)))
    }

    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the public counterpart of this secret key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// Performs a Diffie-Hellman exchange with a remote public key.
    ///
    /// Fails when the resulting shared secret is the all-zero value, which occurs for low-order
    /// public keys a malicious peer could send to remove its own contribution.
    pub fn diffie_hellman(
        &self,
        their_public: &PublicKey,
    ) -> Result<Secret<SHARED_SECRET_SIZE>, X25519Error> {
        let secret = StaticSecret::from(*self.as_bytes());
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public.0));
        if !shared.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(Secret::from_bytes(shared.to_bytes()))
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("shared secret is not contributory")]
    NonContributory,
}

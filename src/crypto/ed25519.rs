// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 identity keys.
//!
//! Identities sign pre-keys with plain Ed25519. For the Diffie-Hellman legs of the key agreement
//! the same key material is converted to X25519: the secret through the clamped scalar derived
//! from the signing seed, the public through its Montgomery form.
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError, Secret};

/// 512-bit Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// 256-bit Ed25519 public key.
pub const IDENTITY_KEY_SIZE: usize = 32;

/// Long-term Ed25519 identity keypair.
///
/// The public part serves as a party's authenticated identifier. The secret part signs pre-keys
/// and feeds the identity legs of the initial key agreement; it is dropped from session state as
/// soon as the handshake completes.
#[derive(Clone)]
pub struct IdentityKey {
    signing_key: SigningKey,
}

impl IdentityKey {
    /// Generates a new random identity.
    pub fn generate(rng: &Rng) -> Result<Self, Ed25519Error> {
        let seed: [u8; 32] = rng.random_array()?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&bytes),
        }
    }

    /// Returns the signing seed, for applications keeping the identity in their own storage.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Returns the public identifier of this identity.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn sign(&self, bytes: &[u8]) -> ed25519_dalek::Signature {
        self.signing_key.sign(bytes)
    }

    /// Converts the identity secret into an X25519 secret key for Diffie-Hellman use.
    pub(crate) fn to_x25519(&self) -> SecretKey {
        SecretKey::from_bytes(self.signing_key.to_scalar_bytes())
    }

    /// Returns the X25519 public key other parties use when sealing messages to this identity.
    pub fn x25519_public_key(&self) -> PublicKey {
        public_to_x25519(&self.public_key())
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKey")
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish()
    }
}

// Serialized as the 32-byte signing seed. The seed is secret material, so it rides in the same
// zeroizing container as every other secret while in memory.
impl Serialize for IdentityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Secret::<32>::from_bytes(self.signing_key.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let seed = Secret::<32>::deserialize(deserializer)?;
        Ok(Self::from_bytes(*seed.as_bytes()))
    }
}

/// Verifies an Ed25519 signature, rejecting malleable and weak-key forms.
pub(crate) fn verify(
    their_public_key: &VerifyingKey,
    bytes: &[u8],
    signature: &ed25519_dalek::Signature,
) -> Result<(), Ed25519Error> {
    their_public_key
        .verify_strict(bytes, signature)
        .map_err(|_| Ed25519Error::VerificationFailed)
}

/// Parses an Ed25519 public key from its wire representation.
pub(crate) fn public_from_bytes(bytes: &[u8; IDENTITY_KEY_SIZE]) -> Result<VerifyingKey, Ed25519Error> {
    VerifyingKey::from_bytes(bytes).map_err(|_| Ed25519Error::InvalidPublicKey)
}

/// Converts an Ed25519 public key to its X25519 counterpart via the Montgomery form.
pub fn public_to_x25519(public_key: &VerifyingKey) -> PublicKey {
    PublicKey::from_bytes(public_key.to_montgomery().to_bytes())
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("invalid ed25519 public key")]
    InvalidPublicKey,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}

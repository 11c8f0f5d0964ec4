// SPDX-License-Identifier: MIT OR Apache-2.0

//! NaCl anonymous box ("sealed box").
//!
//! The sender generates an ephemeral X25519 keypair, derives a shared key with the recipient's
//! long-term public key and encrypts with XSalsa20-Poly1305. The nonce is derived
//! deterministically from the two public keys, so the wire format is simply
//! ephemeral public key || box. Only the recipient can open the box; nothing in it identifies
//! the sender.
use blake2::digest::consts::U24;
use blake2::{Blake2b, Digest};
use crypto_box::SalsaBox;
use crypto_box::aead::Aead;
use crypto_box::aead::generic_array::GenericArray;
use thiserror::Error;

use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};

/// 192-bit XSalsa20 nonce, derived from ephemeral and recipient public keys.
const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag.
const TAG_SIZE: usize = 16;

/// Minimum length of a sealed box: ephemeral public key plus tag.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_SIZE + TAG_SIZE;

/// Encrypts a plaintext to the recipient so that no third party can read it and nothing in the
/// result reveals who produced it.
pub fn seal(
    plaintext: &[u8],
    their_public_key: &PublicKey,
    rng: &Rng,
) -> Result<Vec<u8>, SealedError> {
    let ephemeral_secret = crypto_box::SecretKey::from(rng.random_array()?);
    let ephemeral_public = ephemeral_secret.public_key();

    let recipient = crypto_box::PublicKey::from(*their_public_key.as_bytes());
    let nonce = nonce(ephemeral_public.as_bytes(), recipient.as_bytes());

    let sealed = SalsaBox::new(&recipient, &ephemeral_secret)
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| SealedError::Seal)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Opens a sealed box with our long-term secret key.
pub fn unseal(ciphertext: &[u8], our_secret_key: &SecretKey) -> Result<Vec<u8>, SealedError> {
    if ciphertext.len() < SEAL_OVERHEAD {
        return Err(SealedError::TooShort);
    }
    let (ephemeral_public, sealed) = ciphertext.split_at(PUBLIC_KEY_SIZE);

    let secret = crypto_box::SecretKey::from(*our_secret_key.as_bytes());
    let public = secret.public_key();
    let nonce = nonce(ephemeral_public, public.as_bytes());

    let mut sender_bytes = [0u8; PUBLIC_KEY_SIZE];
    sender_bytes.copy_from_slice(ephemeral_public);
    let sender = crypto_box::PublicKey::from(sender_bytes);
    SalsaBox::new(&sender, &secret)
        .decrypt(GenericArray::from_slice(&nonce), sealed)
        .map_err(|_| SealedError::Unseal)
}

fn nonce(ephemeral_public: &[u8], recipient_public: &[u8]) -> [u8; NONCE_SIZE] {
    let mut hasher = Blake2b::<U24>::new();
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    hasher.finalize().into()
}

#[derive(Debug, Error)]
pub enum SealedError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("sealed box is too short")]
    TooShort,

    #[error("plaintext could not be sealed")]
    Seal,

    #[error("sealed box could not be opened")]
    Unseal,
}

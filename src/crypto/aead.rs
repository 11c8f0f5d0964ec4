// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM authenticated encryption.
//!
//! The random 96-bit nonce is prepended to the ciphertext. Message keys are used exactly once,
//! so a random nonce per call carries no reuse risk.
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use thiserror::Error;

use crate::crypto::{Rng, RngError};

/// 256-bit AEAD key.
pub const KEY_SIZE: usize = 32;

/// 96-bit GCM nonce.
pub const NONCE_SIZE: usize = 12;

/// 128-bit GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// Encrypts and authenticates a plaintext, binding the associated data into the tag.
///
/// Returns nonce || ciphertext || tag.
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
    rng: &Rng,
) -> Result<Vec<u8>, AeadError> {
    let nonce: [u8; NONCE_SIZE] = rng.random_array()?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| AeadError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts nonce || ciphertext || tag, verifying tag and associated data.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, AeadError> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(AeadError::TooShort);
    }
    let (nonce, remainder) = ciphertext.split_at(NONCE_SIZE);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: remainder,
                aad: associated_data,
            },
        )
        .map_err(|_| AeadError::Decrypt)
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("ciphertext is too short")]
    TooShort,

    #[error("plaintext could not be encrypted")]
    Encrypt,

    #[error("ciphertext could not be authenticated and decrypted")]
    Decrypt,
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core cryptographic algorithms and random number generator.
//!
//! Algorithms:
//! - X25519 DH
//! - Ed25519 DSA (with Montgomery-form conversions for DH use)
//! - SHA256 HKDF
//! - AES-256-GCM AEAD
//! - NaCl anonymous box (XSalsa20-Poly1305, BLAKE2b nonce)
//!
//! Random Number Generator:
//! - ChaCha20 stream cipher, seeded from the operating system
pub mod aead;
pub mod ed25519;
pub mod hkdf;
mod rng;
pub mod sealed;
mod secret;
pub mod x25519;

pub use rng::{Rng, RngError};
pub use secret::Secret;

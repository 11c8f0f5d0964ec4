// SPDX-License-Identifier: MIT OR Apache-2.0

//! Root- and message-chain key derivation.
//!
//! The root chain advances exactly once per Diffie-Hellman step and yields the chain key for the
//! direction being opened. Message chains advance once per message and yield single-use message
//! keys. Both peers derive a shared chain from identical inputs, so the direction label has to
//! be identical on both ends as well: chains are labelled by the role of the party transmitting
//! on them, which both peers agree on from the handshake.
use crate::crypto::Secret;
use crate::crypto::hkdf::{HkdfError, HkdfSha256};

/// 256-bit root key.
pub const ROOT_KEY_SIZE: usize = 32;

/// 256-bit chain key.
pub const CHAIN_KEY_SIZE: usize = 32;

/// 256-bit per-message AEAD key.
pub const MESSAGE_KEY_SIZE: usize = 32;

const INFO_ROOT: &[u8; 16] = b"ratchet-root-key";
const INFO_CHAIN_ACTIVE: &[u8; 16] = b"ratchet-send-key";
const INFO_CHAIN_PASSIVE: &[u8; 16] = b"ratchet-recv-key";
const INFO_CHAIN_STEP: &[u8; 16] = b"ratchet-step-key";
const INFO_MESSAGE_KEY: &[u8; 16] = b"message-aead-key";

/// Domain-separation label of a message chain, named after the transmitting party's handshake
/// role.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ChainLabel {
    /// The handshake-active party (the one answering the offer) transmits on this chain.
    Active,
    /// The handshake-passive party (the original offerer) transmits on this chain.
    Passive,
}

impl ChainLabel {
    fn info(self) -> &'static [u8; 16] {
        match self {
            ChainLabel::Active => INFO_CHAIN_ACTIVE,
            ChainLabel::Passive => INFO_CHAIN_PASSIVE,
        }
    }
}

/// Advances the root chain with a Diffie-Hellman output, opening a new message chain.
pub(crate) fn advance_root(
    root_key: &Secret<ROOT_KEY_SIZE>,
    dh_output: &Secret<32>,
    label: ChainLabel,
) -> Result<(Secret<ROOT_KEY_SIZE>, Secret<CHAIN_KEY_SIZE>), HkdfError> {
    let hkdf = HkdfSha256::new(Some(root_key.as_bytes()), dh_output.as_bytes())?;
    let next_root = Secret::from_bytes(hkdf.expand(INFO_ROOT)?);
    let chain_key = Secret::from_bytes(hkdf.expand(label.info())?);
    Ok((next_root, chain_key))
}

/// Advances a message chain by one message, yielding the next chain key and the single-use
/// message key for the current position.
pub(crate) fn advance_chain(
    chain_key: &Secret<CHAIN_KEY_SIZE>,
) -> Result<(Secret<CHAIN_KEY_SIZE>, Secret<MESSAGE_KEY_SIZE>), HkdfError> {
    let hkdf = HkdfSha256::new(None, chain_key.as_bytes())?;
    let next_chain = Secret::from_bytes(hkdf.expand(INFO_CHAIN_STEP)?);
    let message_key = Secret::from_bytes(hkdf.expand(INFO_MESSAGE_KEY)?);
    Ok((next_chain, message_key))
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double Ratchet for forward-secret, self-healing message encryption.
//!
//! Two KDF chains (one per direction) derive a fresh AEAD key for every message, and an outer
//! Diffie-Hellman ratchet replaces both chains whenever the peer advertises a new ratchet key.
//! Message keys for not-yet-seen positions are parked in a bounded [skipped-key
//! buffer](skipped), which makes the ratchet tolerate reordering and loss within fixed limits.
//!
//! Decryption is transactional: it stages all chain movement on a copy of the state and commits
//! only after the ciphertext authenticated, so a failed message leaves the ratchet untouched.
mod chain;
mod dh;
mod header;
mod skipped;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::hkdf::HkdfError;
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, Secret, aead};
use crate::ratchet::chain::{CHAIN_KEY_SIZE, MESSAGE_KEY_SIZE, advance_chain};
use crate::ratchet::dh::DhRatchet;
use crate::ratchet::header::Header;
use crate::ratchet::skipped::{MAX_SKIP_ELEMENTS, SkippedKeys, SkippedKeysFull};

pub use crate::ratchet::chain::ROOT_KEY_SIZE;

/// Associated data bound into every AEAD call: both identity public keys, offerer first.
pub const ASSOCIATED_DATA_SIZE: usize = 64;

/// Double Ratchet state for one established session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoubleRatchet {
    #[serde(with = "serde_bytes")]
    associated_data: [u8; ASSOCIATED_DATA_SIZE],
    dh: DhRatchet,
    send_chain: Option<Secret<CHAIN_KEY_SIZE>>,
    recv_chain: Option<Secret<CHAIN_KEY_SIZE>>,
    send_no: u32,
    recv_no: u32,
    prev_send_no: u32,
    skipped: SkippedKeys,
}

impl DoubleRatchet {
    /// Constructs the ratchet for the party answering an offer. The sending chain opens
    /// immediately against the offered pre-key, so this side can encrypt right away.
    pub(crate) fn active(
        session_key: Secret<ROOT_KEY_SIZE>,
        associated_data: [u8; ASSOCIATED_DATA_SIZE],
        remote_prekey: PublicKey,
        rng: &Rng,
    ) -> Result<Self, RatchetError> {
        let (dh, send_chain) = DhRatchet::active(session_key, remote_prekey, rng)?;
        Ok(Self {
            associated_data,
            dh,
            send_chain: Some(send_chain),
            recv_chain: None,
            send_no: 0,
            recv_no: 0,
            prev_send_no: 0,
            skipped: SkippedKeys::default(),
        })
    }

    /// Constructs the ratchet for the original offerer. Both chains stay closed until the
    /// peer's first message arrives and triggers the initial Diffie-Hellman step.
    pub(crate) fn passive(
        session_key: Secret<ROOT_KEY_SIZE>,
        associated_data: [u8; ASSOCIATED_DATA_SIZE],
        prekey_secret: SecretKey,
    ) -> Self {
        Self {
            associated_data,
            dh: DhRatchet::passive(session_key, prekey_secret),
            send_chain: None,
            recv_chain: None,
            send_no: 0,
            recv_no: 0,
            prev_send_no: 0,
            skipped: SkippedKeys::default(),
        }
    }

    /// Encrypts a plaintext with the next key of the sending chain.
    pub fn encrypt(&mut self, plaintext: &[u8], rng: &Rng) -> Result<Vec<u8>, RatchetError> {
        let send_chain = self.send_chain.as_ref().ok_or(RatchetError::ChainClosed)?;
        let (next_chain, message_key) = advance_chain(send_chain)?;

        let header = Header {
            public_key: *self.dh.public_key(),
            prev_send_no: self.prev_send_no,
            message_no: self.send_no,
        };
        let header_bytes = header.to_bytes();

        let ciphertext = aead::encrypt(
            message_key.as_bytes(),
            plaintext,
            &self.associated(&header_bytes),
            rng,
        )?;

        self.send_chain = Some(next_chain);
        self.send_no += 1;

        Ok(header.frame(ciphertext))
    }

    /// Decrypts an inbound ratchet message.
    ///
    /// Any error leaves the state exactly as it was, so one undecryptable message does not tear
    /// down the session.
    pub fn decrypt(&mut self, message: &[u8], rng: &Rng) -> Result<Vec<u8>, RatchetError> {
        let (header, header_bytes, ciphertext) = Header::unframe(message)?;
        let associated_data = self.associated(header_bytes);

        let mut staged = self.clone();
        let plaintext = staged.decrypt_staged(&header, &associated_data, ciphertext, rng)?;
        *self = staged;

        Ok(plaintext)
    }

    fn decrypt_staged(
        &mut self,
        header: &Header,
        associated_data: &[u8],
        ciphertext: &[u8],
        rng: &Rng,
    ) -> Result<Vec<u8>, RatchetError> {
        // A key parked for this exact position decrypts without moving any chain.
        if let Some(message_key) = self.skipped.remove(&header.public_key, header.message_no) {
            return Ok(aead::decrypt(
                message_key.as_bytes(),
                ciphertext,
                associated_data,
            )?);
        }

        if self.dh.needs_step(&header.public_key) {
            // Park the remainder of the outgoing receiving chain before it becomes
            // unreachable, then re-key both directions.
            if self.recv_chain.is_some() {
                let remote_key = *self
                    .dh
                    .remote_key()
                    .expect("open receiving chain implies a known remote key");
                self.park_until(&remote_key, header.prev_send_no)?;
            }

            debug!(remote_key = %header.public_key, "ratchet step");
            let (recv_chain, send_chain) = self.dh.step(header.public_key, rng)?;
            self.recv_chain = Some(recv_chain);
            self.send_chain = Some(send_chain);
            self.prev_send_no = self.send_no;
            self.send_no = 0;
            self.recv_no = 0;
        }

        if header.message_no < self.recv_no {
            // Its key is gone from the buffer as well, so this is a replay or a forgery.
            return Err(RatchetError::UsedMessageKey(header.message_no));
        }

        let message_key = self.skip_to(&header.public_key, header.message_no)?;
        let plaintext = aead::decrypt(message_key.as_bytes(), ciphertext, associated_data)?;
        Ok(plaintext)
    }

    /// Advances the receiving chain up to and including `message_no`, parking the keys of all
    /// skipped positions, and returns the key at `message_no` itself.
    fn skip_to(
        &mut self,
        remote_key: &PublicKey,
        message_no: u32,
    ) -> Result<Secret<MESSAGE_KEY_SIZE>, RatchetError> {
        self.park_until(remote_key, message_no)?;

        let recv_chain = self.recv_chain.as_ref().ok_or(RatchetError::ChainClosed)?;
        let (next_chain, message_key) = advance_chain(recv_chain)?;
        self.recv_chain = Some(next_chain);
        self.recv_no = message_no + 1;
        Ok(message_key)
    }

    /// Advances the receiving chain up to (excluding) `end_no`, parking every derived key under
    /// the given remote chain key.
    fn park_until(&mut self, remote_key: &PublicKey, end_no: u32) -> Result<(), RatchetError> {
        let skipping = end_no.saturating_sub(self.recv_no);
        if skipping > MAX_SKIP_ELEMENTS as u32 {
            return Err(RatchetError::TooManySkipped(skipping));
        }

        let mut recv_chain = self.recv_chain.clone().ok_or(RatchetError::ChainClosed)?;
        while self.recv_no < end_no {
            let (next_chain, message_key) = advance_chain(&recv_chain)?;
            self.skipped.insert(remote_key, self.recv_no, message_key)?;
            recv_chain = next_chain;
            self.recv_no += 1;
        }
        self.recv_chain = Some(recv_chain);
        Ok(())
    }

    fn associated(&self, header_bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ASSOCIATED_DATA_SIZE + header_bytes.len());
        out.extend_from_slice(&self.associated_data);
        out.extend_from_slice(header_bytes);
        out
    }
}

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Aead(#[from] aead::AeadError),

    #[error("ratchet message is malformed")]
    MalformedMessage,

    #[error("chain is closed for this direction")]
    ChainClosed,

    #[error("message skips {0} positions, more than the {MAX_SKIP_ELEMENTS} permitted")]
    TooManySkipped(u32),

    #[error("message key {0} was already used")]
    UsedMessageKey(u32),

    #[error("skipped-key buffer is full for this chain")]
    SkippedKeysFull,
}

impl From<SkippedKeysFull> for RatchetError {
    fn from(_: SkippedKeysFull) -> Self {
        RatchetError::SkippedKeysFull
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outer Diffie-Hellman ratchet.
//!
//! Holds the current local keypair, the last-seen remote public key and the root key. A step
//! runs whenever an inbound header advertises a remote public key we have not seen: the root
//! chain is advanced twice, first opening the new receiving chain against our current keypair,
//! then opening the new sending chain from a freshly generated one.
use serde::{Deserialize, Serialize};

use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, Secret};
use crate::ratchet::RatchetError;
use crate::ratchet::chain::{CHAIN_KEY_SIZE, ChainLabel, ROOT_KEY_SIZE, advance_root};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct DhRatchet {
    secret_key: SecretKey,
    public_key: PublicKey,
    remote_key: Option<PublicKey>,
    root_key: Secret<ROOT_KEY_SIZE>,
    /// True for the handshake-active party (the one answering the offer). The active side sends
    /// first after each step, and the flag fixes the chain labels both peers derive with.
    active: bool,
}

impl DhRatchet {
    /// Creates the ratchet for the handshake-active party and opens its first sending chain
    /// against the offered pre-key.
    pub fn active(
        root_key: Secret<ROOT_KEY_SIZE>,
        remote_prekey: PublicKey,
        rng: &Rng,
    ) -> Result<(Self, Secret<CHAIN_KEY_SIZE>), RatchetError> {
        let secret_key = SecretKey::generate(rng)?;
        let public_key = secret_key.public_key();

        let dh_output = secret_key.diffie_hellman(&remote_prekey)?;
        let (root_key, send_chain) = advance_root(&root_key, &dh_output, ChainLabel::Active)?;

        Ok((
            Self {
                secret_key,
                public_key,
                remote_key: Some(remote_prekey),
                root_key,
                active: true,
            },
            send_chain,
        ))
    }

    /// Creates the ratchet for the handshake-passive party. Its keypair is the signed pre-key
    /// advertised in the offer; the first inbound message installs the remote key and opens the
    /// chains.
    pub fn passive(root_key: Secret<ROOT_KEY_SIZE>, prekey_secret: SecretKey) -> Self {
        let public_key = prekey_secret.public_key();
        Self {
            secret_key: prekey_secret,
            public_key,
            remote_key: None,
            root_key,
            active: false,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn remote_key(&self) -> Option<&PublicKey> {
        self.remote_key.as_ref()
    }

    /// Whether an inbound header's ratchet key requires a step before its chain is reachable.
    pub fn needs_step(&self, header_key: &PublicKey) -> bool {
        self.remote_key.as_ref() != Some(header_key)
    }

    fn send_label(&self) -> ChainLabel {
        if self.active {
            ChainLabel::Active
        } else {
            ChainLabel::Passive
        }
    }

    fn recv_label(&self) -> ChainLabel {
        if self.active {
            ChainLabel::Passive
        } else {
            ChainLabel::Active
        }
    }

    /// Performs a full step against a newly observed remote key.
    ///
    /// Returns the fresh receiving chain key followed by the fresh sending chain key.
    pub fn step(
        &mut self,
        remote_key: PublicKey,
        rng: &Rng,
    ) -> Result<(Secret<CHAIN_KEY_SIZE>, Secret<CHAIN_KEY_SIZE>), RatchetError> {
        // Receiving chain against our current keypair.
        let dh_output = self.secret_key.diffie_hellman(&remote_key)?;
        let (root_key, recv_chain) = advance_root(&self.root_key, &dh_output, self.recv_label())?;

        // Fresh keypair, then the sending chain.
        let secret_key = SecretKey::generate(rng)?;
        let dh_output = secret_key.diffie_hellman(&remote_key)?;
        let (root_key, send_chain) = advance_root(&root_key, &dh_output, self.send_label())?;

        self.public_key = secret_key.public_key();
        self.secret_key = secret_key;
        self.remote_key = Some(remote_key);
        self.root_key = root_key;

        Ok((recv_chain, send_chain))
    }
}

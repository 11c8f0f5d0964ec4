// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded buffer for skipped message keys.
//!
//! Keys for messages that have not arrived yet are parked here, organized as a ring of chains
//! keyed by the sender's ratchet public key. The ring holds a fixed number of chains and each
//! chain a fixed number of keys, so a malicious peer claiming huge message counts cannot make
//! us allocate unbounded precomputed keys. Inserting a chain past capacity evicts the oldest
//! chain along with all of its keys.
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::crypto::Secret;
use crate::crypto::x25519::PublicKey;
use crate::ratchet::chain::MESSAGE_KEY_SIZE;

/// Maximum number of cached chains.
pub const MAX_SKIP_CHAINS: usize = 8;

/// Maximum number of message keys per cached chain.
pub const MAX_SKIP_ELEMENTS: usize = 32;

/// Ring of per-chain skipped message keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct SkippedKeys {
    chains: VecDeque<SkippedChain>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SkippedChain {
    remote_key: PublicKey,
    message_keys: HashMap<u32, Secret<MESSAGE_KEY_SIZE>>,
}

impl SkippedKeys {
    /// Parks a message key for a chain position that has not arrived yet.
    pub fn insert(
        &mut self,
        remote_key: &PublicKey,
        message_no: u32,
        message_key: Secret<MESSAGE_KEY_SIZE>,
    ) -> Result<(), SkippedKeysFull> {
        let chain = match self.chain_mut(remote_key) {
            Some(chain) => chain,
            None => {
                if self.chains.len() == MAX_SKIP_CHAINS {
                    self.chains.pop_back();
                }
                self.chains.push_front(SkippedChain {
                    remote_key: *remote_key,
                    message_keys: HashMap::new(),
                });
                self.chains.front_mut().expect("chain was just inserted")
            }
        };

        if chain.message_keys.len() >= MAX_SKIP_ELEMENTS {
            return Err(SkippedKeysFull);
        }
        chain.message_keys.insert(message_no, message_key);
        Ok(())
    }

    /// Takes the parked key for a chain and message number, consuming it.
    pub fn remove(
        &mut self,
        remote_key: &PublicKey,
        message_no: u32,
    ) -> Option<Secret<MESSAGE_KEY_SIZE>> {
        self.chain_mut(remote_key)
            .and_then(|chain| chain.message_keys.remove(&message_no))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.chains
            .iter()
            .map(|chain| chain.message_keys.len())
            .sum()
    }

    fn chain_mut(&mut self, remote_key: &PublicKey) -> Option<&mut SkippedChain> {
        // Chain lookup happens with attacker-controlled key material, compare in constant time.
        self.chains
            .iter_mut()
            .find(|chain| bool::from(chain.remote_key.as_bytes().ct_eq(remote_key.as_bytes())))
    }
}

/// A chain reached its per-chain key capacity.
#[derive(Debug)]
pub(crate) struct SkippedKeysFull;

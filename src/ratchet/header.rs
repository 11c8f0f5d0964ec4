// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::crypto::x25519::{PUBLIC_KEY_SIZE, PublicKey};
use crate::ratchet::RatchetError;

/// Ratchet public key || previous sending-chain length || message number, both counters u32
/// big-endian.
pub(crate) const HEADER_SIZE: usize = PUBLIC_KEY_SIZE + 4 + 4;

/// Length prefix framing the header in front of the ciphertext.
const LENGTH_PREFIX_SIZE: usize = 2;

/// Plaintext header of every ratchet message.
///
/// The header is authenticated (it is part of the AEAD associated data) but not encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    /// Sender's current ratchet public key.
    pub public_key: PublicKey,
    /// Number of messages in the sender's previous sending chain.
    pub prev_send_no: u32,
    /// Position of this message in the current sending chain.
    pub message_no: u32,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(self.public_key.as_bytes());
        bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + 4].copy_from_slice(&self.prev_send_no.to_be_bytes());
        bytes[PUBLIC_KEY_SIZE + 4..].copy_from_slice(&self.message_no.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RatchetError> {
        if bytes.len() != HEADER_SIZE {
            return Err(RatchetError::MalformedMessage);
        }

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);

        let mut counter = [0u8; 4];
        counter.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + 4]);
        let prev_send_no = u32::from_be_bytes(counter);
        counter.copy_from_slice(&bytes[PUBLIC_KEY_SIZE + 4..]);
        let message_no = u32::from_be_bytes(counter);

        Ok(Self {
            public_key: PublicKey::from_bytes(public_key),
            prev_send_no,
            message_no,
        })
    }

    /// Frames header and ciphertext into a single ratchet message.
    pub fn frame(&self, ciphertext: Vec<u8>) -> Vec<u8> {
        let header = self.to_bytes();
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + header.len() + ciphertext.len());
        out.extend_from_slice(&(header.len() as u16).to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Splits a ratchet message into its header (parsed and raw) and ciphertext.
    pub fn unframe(message: &[u8]) -> Result<(Self, &[u8], &[u8]), RatchetError> {
        if message.len() < LENGTH_PREFIX_SIZE {
            return Err(RatchetError::MalformedMessage);
        }
        let (prefix, remainder) = message.split_at(LENGTH_PREFIX_SIZE);
        let header_len = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
        if remainder.len() <= header_len {
            return Err(RatchetError::MalformedMessage);
        }

        let (header_bytes, ciphertext) = remainder.split_at(header_len);
        let header = Self::from_bytes(header_bytes)?;
        Ok((header, header_bytes, ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::PublicKey;
    use crate::ratchet::RatchetError;

    use super::Header;

    #[test]
    fn frame_and_unframe() {
        let header = Header {
            public_key: PublicKey::from_bytes([7; 32]),
            prev_send_no: 3,
            message_no: 12,
        };

        let message = header.frame(vec![1, 2, 3, 4]);
        let (parsed, raw, ciphertext) = Header::unframe(&message).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(raw, header.to_bytes());
        assert_eq!(ciphertext, [1, 2, 3, 4]);
    }

    #[test]
    fn truncated_message() {
        let header = Header {
            public_key: PublicKey::from_bytes([7; 32]),
            prev_send_no: 0,
            message_no: 0,
        };

        let message = header.frame(vec![1]);
        for len in 0..message.len() - 1 {
            assert!(matches!(
                Header::unframe(&message[..len]),
                Err(RatchetError::MalformedMessage)
            ));
        }
    }
}

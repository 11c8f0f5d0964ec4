// SPDX-License-Identifier: MIT OR Apache-2.0

//! Printable wire envelope carrying handshake and data messages.
//!
//! Every message travels as `!RAT!<type><payload>!CHT!` where `<type>` is a single ASCII digit
//! and `<payload>` the base64url-encoded (unpadded) binary payload. The format is 7-bit safe,
//! so messages can be pasted into any text-based transport.
//!
//! Payload layouts (fixed-size fields are raw bytes, not length-prefixed):
//!
//! | Type  | Layout                                                                    |
//! |-------|---------------------------------------------------------------------------|
//! | Offer | identity key (32) || pre-key (32) || pre-key signature (64) || UUID (16) || nickname |
//! | Ack   | identity key (32) || ephemeral key (32) || UUID (16) || ciphertext           |
//! | Data  | UUID (16) || ciphertext                                                    |
//! | Close | UUID (16) || `0xff`                                                        |
//! | Sealed| anonymous box of inner type digit || inner payload                         |
//!
//! Sealing hides the offerer's nickname and identity key from on-path observers; only the
//! recipient of the box can open it.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Indicates the beginning of an encoded message.
pub const PREFIX: &str = "!RAT!";

/// Indicates the end of an encoded message.
pub const SUFFIX: &str = "!CHT!";

/// 128-bit session identifier carried by every message after the offer.
pub const UUID_SIZE: usize = 16;

const IDENTITY_KEY_SIZE: usize = 32;
const PREKEY_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 64;

const OFFER_MIN_SIZE: usize = IDENTITY_KEY_SIZE + PREKEY_SIZE + SIGNATURE_SIZE + UUID_SIZE;
const ACK_MIN_SIZE: usize = IDENTITY_KEY_SIZE + PREKEY_SIZE + UUID_SIZE;

/// Payload of a session close message.
const CLOSE_MARKER: [u8; 1] = [0xff];

/// A parsed wire message.
///
/// The set of message types is closed and binary-stable; new protocol revisions get new type
/// digits rather than variations of existing layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Initial message of the offering party, advertising its X3DH parameters.
    Offer(Offer),
    /// The answering party's acknowledgement, finishing X3DH and carrying the first ciphertext.
    Ack(Ack),
    /// An encrypted message exchanged after establishment.
    Data(Data),
    /// Session teardown, possible in every state.
    Close(Close),
    /// An offer concealed in an anonymous box addressed to the recipient.
    Sealed(Sealed),
}

impl Envelope {
    /// Parses a wire message. Exact prefix/suffix match is required and unknown type digits are
    /// rejected.
    pub fn parse(input: &str) -> Result<Self, EnvelopeError> {
        let body = input
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(SUFFIX))
            .ok_or(EnvelopeError::Delimiters)?;

        let body = body.as_bytes();
        let type_digit = *body.first().ok_or(EnvelopeError::Delimiters)?;
        let payload = URL_SAFE_NO_PAD
            .decode(&body[1..])
            .map_err(|_| EnvelopeError::Base64)?;

        Self::from_payload(type_digit.wrapping_sub(b'0'), &payload)
    }

    /// Encodes this message for the wire.
    pub fn encode(&self) -> String {
        let mut out = String::from(PREFIX);
        out.push((b'0' + self.type_digit()) as char);
        out.push_str(&URL_SAFE_NO_PAD.encode(self.payload()));
        out.push_str(SUFFIX);
        out
    }

    /// The session UUID a recipient uses to route this message, if the type carries one.
    ///
    /// Offers carry the *sender's* UUID, all other types the recipient's. Sealed messages
    /// reveal nothing before unsealing.
    pub fn uuid(&self) -> Option<&[u8; UUID_SIZE]> {
        match self {
            Envelope::Offer(offer) => Some(&offer.uuid),
            Envelope::Ack(ack) => Some(&ack.uuid),
            Envelope::Data(data) => Some(&data.uuid),
            Envelope::Close(close) => Some(&close.uuid),
            Envelope::Sealed(_) => None,
        }
    }

    fn type_digit(&self) -> u8 {
        match self {
            Envelope::Offer(_) => 1,
            Envelope::Ack(_) => 2,
            Envelope::Data(_) => 3,
            Envelope::Close(_) => 4,
            Envelope::Sealed(_) => 5,
        }
    }

    /// Human-readable type name, used in errors.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Envelope::Offer(_) => "offer",
            Envelope::Ack(_) => "ack",
            Envelope::Data(_) => "data",
            Envelope::Close(_) => "close",
            Envelope::Sealed(_) => "sealed",
        }
    }

    fn from_payload(type_digit: u8, payload: &[u8]) -> Result<Self, EnvelopeError> {
        match type_digit {
            1 => Ok(Envelope::Offer(Offer::from_payload(payload)?)),
            2 => Ok(Envelope::Ack(Ack::from_payload(payload)?)),
            3 => Ok(Envelope::Data(Data::from_payload(payload)?)),
            4 => Ok(Envelope::Close(Close::from_payload(payload)?)),
            5 => Ok(Envelope::Sealed(Sealed::from_payload(payload)?)),
            other => Err(EnvelopeError::UnknownType(other)),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Envelope::Offer(offer) => offer.payload(),
            Envelope::Ack(ack) => ack.payload(),
            Envelope::Data(data) => data.payload(),
            Envelope::Close(close) => close.payload(),
            Envelope::Sealed(sealed) => sealed.0.clone(),
        }
    }

    /// Serializes the inner payload of a message about to be sealed: type digit || payload.
    pub(crate) fn sealed_payload(&self) -> Result<Vec<u8>, EnvelopeError> {
        if matches!(self, Envelope::Sealed(_)) {
            return Err(EnvelopeError::SealedInSealed);
        }
        let mut out = vec![b'0' + self.type_digit()];
        out.extend_from_slice(&self.payload());
        Ok(out)
    }

    /// Parses the plaintext of an opened sealed box back into a message.
    pub(crate) fn from_sealed_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let (type_digit, payload) = payload.split_first().ok_or(EnvelopeError::Truncated {
            token: "sealed",
            minimum: 1,
        })?;
        let envelope = Self::from_payload(type_digit.wrapping_sub(b'0'), payload)?;
        if matches!(envelope, Envelope::Sealed(_)) {
            return Err(EnvelopeError::SealedInSealed);
        }
        Ok(envelope)
    }
}

/// Initial message of the offering party: its public Ed25519 identity key, X25519 signed
/// pre-key, pre-key signature, session UUID and nickname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub identity_key: [u8; IDENTITY_KEY_SIZE],
    pub prekey: [u8; PREKEY_SIZE],
    pub prekey_signature: [u8; SIGNATURE_SIZE],
    pub uuid: [u8; UUID_SIZE],
    pub nickname: Vec<u8>,
}

impl Offer {
    /// Nickname of the offering party.
    pub fn nickname(&self) -> String {
        String::from_utf8_lossy(&self.nickname).into_owned()
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OFFER_MIN_SIZE + self.nickname.len());
        out.extend_from_slice(&self.identity_key);
        out.extend_from_slice(&self.prekey);
        out.extend_from_slice(&self.prekey_signature);
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&self.nickname);
        out
    }

    fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() < OFFER_MIN_SIZE {
            return Err(EnvelopeError::Truncated {
                token: "offer",
                minimum: OFFER_MIN_SIZE,
            });
        }

        let mut offer = Self {
            identity_key: [0; IDENTITY_KEY_SIZE],
            prekey: [0; PREKEY_SIZE],
            prekey_signature: [0; SIGNATURE_SIZE],
            uuid: [0; UUID_SIZE],
            nickname: payload[OFFER_MIN_SIZE..].to_vec(),
        };
        offer.identity_key.copy_from_slice(&payload[..32]);
        offer.prekey.copy_from_slice(&payload[32..64]);
        offer.prekey_signature.copy_from_slice(&payload[64..128]);
        offer.uuid.copy_from_slice(&payload[128..144]);
        Ok(offer)
    }
}

/// The answering party's acknowledgement: its public Ed25519 identity key, ephemeral X25519
/// key, the offerer's session UUID and the first ratchet ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub identity_key: [u8; IDENTITY_KEY_SIZE],
    pub ephemeral_key: [u8; PREKEY_SIZE],
    pub uuid: [u8; UUID_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Ack {
    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACK_MIN_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.identity_key);
        out.extend_from_slice(&self.ephemeral_key);
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() <= ACK_MIN_SIZE {
            return Err(EnvelopeError::Truncated {
                token: "ack",
                minimum: ACK_MIN_SIZE + 1,
            });
        }

        let mut ack = Self {
            identity_key: [0; IDENTITY_KEY_SIZE],
            ephemeral_key: [0; PREKEY_SIZE],
            uuid: [0; UUID_SIZE],
            ciphertext: payload[ACK_MIN_SIZE..].to_vec(),
        };
        ack.identity_key.copy_from_slice(&payload[..32]);
        ack.ephemeral_key.copy_from_slice(&payload[32..64]);
        ack.uuid.copy_from_slice(&payload[64..80]);
        Ok(ack)
    }
}

/// Encrypted message exchanged between established sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub uuid: [u8; UUID_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Data {
    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UUID_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() <= UUID_SIZE {
            return Err(EnvelopeError::Truncated {
                token: "data",
                minimum: UUID_SIZE + 1,
            });
        }

        let mut data = Self {
            uuid: [0; UUID_SIZE],
            ciphertext: payload[UUID_SIZE..].to_vec(),
        };
        data.uuid.copy_from_slice(&payload[..UUID_SIZE]);
        Ok(data)
    }
}

/// Session teardown message. The payload is the fixed sentinel `0xff`, compared in constant
/// time on parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub uuid: [u8; UUID_SIZE],
}

impl Close {
    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UUID_SIZE + CLOSE_MARKER.len());
        out.extend_from_slice(&self.uuid);
        out.extend_from_slice(&CLOSE_MARKER);
        out
    }

    fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() <= UUID_SIZE {
            return Err(EnvelopeError::Truncated {
                token: "close",
                minimum: UUID_SIZE + 1,
            });
        }

        if !bool::from(payload[UUID_SIZE..].ct_eq(&CLOSE_MARKER)) {
            return Err(EnvelopeError::CloseMarker);
        }

        let mut close = Self {
            uuid: [0; UUID_SIZE],
        };
        close.uuid.copy_from_slice(&payload[..UUID_SIZE]);
        Ok(close)
    }
}

/// An anonymous box containing another message. Opaque until opened with the recipient's
/// X25519 secret key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed(Vec<u8>);

impl Sealed {
    pub(crate) fn new(sealed: Vec<u8>) -> Self {
        Self(sealed)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() <= 1 {
            return Err(EnvelopeError::Truncated {
                token: "sealed",
                minimum: 2,
            });
        }
        Ok(Self(payload.to_vec()))
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("message string misses pre- and/or suffix")]
    Delimiters,

    #[error("message payload is not valid base64")]
    Base64,

    #[error("unsupported message type {0}")]
    UnknownType(u8),

    #[error("{token} payload must be at least {minimum} bytes")]
    Truncated {
        token: &'static str,
        minimum: usize,
    },

    #[error("close message has an invalid payload")]
    CloseMarker,

    #[error("sealed messages cannot nest")]
    SealedInSealed,
}

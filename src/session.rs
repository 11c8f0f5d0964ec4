// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session between two parties to exchange encrypted messages.
//!
//! Each party creates a [`Session`] configured with its long-term identity key and a
//! [`VerifyPeer`] capability to judge the other party's public identity key.
//!
//! The offering party starts by "upgrading" the conversation ([`Session::offer`]). The other
//! party confirms ([`Session::acknowledge`]), and once the offering party has consumed the
//! acknowledgement ([`Session::receive`]) both sessions are established: every party can
//! encrypt messages to the other ([`Session::send`]), feed inbound messages in
//! ([`Session::receive`]) and tear the session down again ([`Session::close`]).
//!
//! A session moves through three states. *Empty* before the handshake and after a close,
//! *pending* on the offerer's side while its offer awaits the acknowledgement, and *active*
//! once the messaging ratchet exists. Closing returns to *empty*, so the value can be reused
//! for a fresh handshake after re-arming it with an identity key.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cbor::{self, DecodeError, EncodeError};
use crate::crypto::ed25519::{self, IdentityKey};
use crate::crypto::sealed::SealedError;
use crate::crypto::x25519::PublicKey;
use crate::crypto::{Rng, RngError, sealed};
use crate::envelope::{Ack, Close, Data, Envelope, EnvelopeError, Offer, Sealed, UUID_SIZE};
use crate::ratchet::{DoubleRatchet, RatchetError};
use crate::traits::{Clock, SystemClock, VerifyPeer};
use crate::x3dh::{self, SignedPreKey, X3dhError};

/// 128-bit opaque session identifier. Each party picks its own.
///
/// On outbound data messages the low 48 bits carry the current epoch millisecond, serving as a
/// coarse timestamp and a monotonic message identifier.
pub type SessionUuid = [u8; UUID_SIZE];

/// Size of the first encrypted payload inside an acknowledgement: the answering party's session
/// UUID plus random filler.
const INITIAL_PAYLOAD_SIZE: usize = 23;

/// Outcome of feeding an inbound message into [`Session::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// An offer came in and was answered; the returned acknowledgement message must be
    /// delivered to the offering party. This session is established now.
    Acknowledged(String),
    /// The peer acknowledged our offer; the session is established now.
    Established,
    /// A data message decrypted into this plaintext.
    Plaintext(Vec<u8>),
    /// The peer closed the session; local state has been reset.
    Closed,
}

/// Serializable part of a session.
///
/// The identity key is only present while the handshake may still need it; it never survives
/// into the active state, so persistent records of active sessions contain no long-term
/// secrets.
#[derive(Debug, Serialize, Deserialize)]
struct SessionState {
    local_uuid: SessionUuid,
    remote_uuid: Option<SessionUuid>,
    nickname: String,
    identity: Option<IdentityKey>,
    prekey: Option<SignedPreKey>,
    ratchet: Option<DoubleRatchet>,
}

/// One end of a two-party encrypted session.
pub struct Session {
    state: SessionState,
    verify_peer: Box<dyn VerifyPeer>,
    clock: Box<dyn Clock>,
}

impl Session {
    /// Creates a fresh session in the empty state.
    ///
    /// The identity key authenticates the handshake and is dropped from the session once it is
    /// established. The verify-peer capability is consulted for every inbound offer and
    /// acknowledgement.
    pub fn new(
        local_uuid: SessionUuid,
        nickname: impl Into<String>,
        identity: IdentityKey,
        verify_peer: Box<dyn VerifyPeer>,
    ) -> Self {
        Self {
            state: SessionState {
                local_uuid,
                remote_uuid: None,
                nickname: nickname.into(),
                identity: Some(identity),
                prekey: None,
                ratchet: None,
            },
            verify_peer,
            clock: Box::new(SystemClock),
        }
    }

    /// Replaces the wall clock used to stamp outbound messages.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns true once the handshake completed and messages can be exchanged.
    pub fn is_active(&self) -> bool {
        self.state.ratchet.is_some()
    }

    pub fn local_uuid(&self) -> &SessionUuid {
        &self.state.local_uuid
    }

    /// The peer's session UUID, known once the handshake completed.
    pub fn remote_uuid(&self) -> Option<&SessionUuid> {
        self.state.remote_uuid.as_ref()
    }

    pub fn nickname(&self) -> &str {
        &self.state.nickname
    }

    /// Re-arms an emptied session with an identity key so it can handshake again.
    ///
    /// Active sessions drop their identity key; applications which want to reuse a closed
    /// session (or resume a restored empty one) supply it again here.
    pub fn set_identity(&mut self, identity: IdentityKey) {
        self.state.identity = Some(identity);
    }

    /// Offers the peer to establish an encrypted session.
    ///
    /// Only legal while the session is empty. The returned message must be delivered to the
    /// peer; the session is pending until the peer's acknowledgement arrives.
    pub fn offer(&mut self, rng: &Rng) -> Result<String, SessionError> {
        Ok(Envelope::Offer(self.create_offer(rng)?).encode())
    }

    /// Like [`Session::offer`], but conceals the offer in an anonymous box addressed to the
    /// peer's X25519 identity key, hiding nickname and identity key from observers.
    ///
    /// The recipient key is the Montgomery form of the peer's Ed25519 identity, usually
    /// obtained from the same directory that backs [`VerifyPeer`].
    pub fn offer_sealed(
        &mut self,
        their_key: &PublicKey,
        rng: &Rng,
    ) -> Result<String, SessionError> {
        let offer = Envelope::Offer(self.create_offer(rng)?);
        let sealed = sealed::seal(&offer.sealed_payload()?, their_key, rng)?;
        Ok(Envelope::Sealed(Sealed::new(sealed)).encode())
    }

    fn create_offer(&mut self, rng: &Rng) -> Result<Offer, SessionError> {
        if self.state.ratchet.is_some() || self.state.prekey.is_some() {
            return Err(SessionError::NotEmpty);
        }
        let identity = self
            .state
            .identity
            .as_ref()
            .ok_or(SessionError::MissingIdentity)?;

        let prekey = SignedPreKey::generate(identity, rng)?;
        let offer = Offer {
            identity_key: identity.public_key().to_bytes(),
            prekey: prekey.public_key().to_bytes(),
            prekey_signature: prekey.signature().to_bytes(),
            uuid: self.state.local_uuid,
            nickname: self.state.nickname.clone().into_bytes(),
        };

        self.state.prekey = Some(prekey);
        debug!(uuid = %hex::encode(self.state.local_uuid), "created session offer");

        Ok(offer)
    }

    /// Answers a peer's offer, establishing this session.
    ///
    /// The returned acknowledgement message must be delivered back to the offering party.
    /// Equivalent to [`Session::receive`] on an offer message.
    pub fn acknowledge(&mut self, offer: &str, rng: &Rng) -> Result<String, SessionError> {
        match Envelope::parse(offer)? {
            Envelope::Offer(offer) => self.receive_offer(offer, rng),
            other => Err(SessionError::UnexpectedMessage(other.type_name())),
        }
    }

    /// Feeds an inbound message into the session.
    ///
    /// All messages except our own outbound ones go through here; the returned [`Received`]
    /// describes what happened. Errors leave the session state unchanged, with one exception:
    /// an acknowledgement whose initial ciphertext fails to authenticate discards the pending
    /// handshake.
    pub fn receive(&mut self, message: &str, rng: &Rng) -> Result<Received, SessionError> {
        let envelope = Envelope::parse(message)?;
        self.receive_envelope(envelope, rng)
    }

    fn receive_envelope(
        &mut self,
        envelope: Envelope,
        rng: &Rng,
    ) -> Result<Received, SessionError> {
        match envelope {
            Envelope::Offer(offer) => {
                let ack = self.receive_offer(offer, rng)?;
                Ok(Received::Acknowledged(ack))
            }
            Envelope::Ack(ack) => {
                self.receive_ack(ack, rng)?;
                Ok(Received::Established)
            }
            Envelope::Data(data) => {
                let plaintext = self.receive_data(data, rng)?;
                Ok(Received::Plaintext(plaintext))
            }
            Envelope::Close(_) => {
                debug!(uuid = %hex::encode(self.state.local_uuid), "peer closed session");
                self.reset();
                Ok(Received::Closed)
            }
            Envelope::Sealed(sealed) => {
                // Unsealing needs the identity secret, which only exists before activation.
                let identity = self
                    .state
                    .identity
                    .as_ref()
                    .ok_or(SessionError::UnexpectedMessage("sealed"))?;
                let plaintext = sealed::unseal(sealed.as_bytes(), &identity.to_x25519())?;
                let inner = Envelope::from_sealed_payload(&plaintext)?;
                self.receive_envelope(inner, rng)
            }
        }
    }

    fn receive_offer(&mut self, offer: Offer, rng: &Rng) -> Result<String, SessionError> {
        if self.state.ratchet.is_some() || self.state.prekey.is_some() {
            return Err(SessionError::UnexpectedMessage("offer"));
        }
        let identity = self
            .state
            .identity
            .as_ref()
            .ok_or(SessionError::MissingIdentity)?;

        let their_identity =
            ed25519::public_from_bytes(&offer.identity_key).map_err(|_| SessionError::BadPeer)?;
        if !self.verify_peer.verify_peer(&their_identity) {
            return Err(SessionError::BadPeer);
        }

        let their_prekey = PublicKey::from_bytes(offer.prekey);
        let (keys, ephemeral_public) = x3dh::initiate(
            identity,
            &their_identity,
            &their_prekey,
            &ed25519_dalek::Signature::from_bytes(&offer.prekey_signature),
            rng,
        )?;

        let mut ratchet =
            DoubleRatchet::active(keys.session_key, keys.associated_data, their_prekey, rng)?;

        // First payload towards the offerer: our UUID plus random filler, always 23 bytes.
        let mut initial_payload = [0u8; INITIAL_PAYLOAD_SIZE];
        initial_payload[..UUID_SIZE].copy_from_slice(&self.state.local_uuid);
        initial_payload[UUID_SIZE..].copy_from_slice(&rng.random_array::<7>()?);
        let ciphertext = ratchet.encrypt(&initial_payload, rng)?;

        let ack = Envelope::Ack(Ack {
            identity_key: identity.public_key().to_bytes(),
            ephemeral_key: ephemeral_public.to_bytes(),
            uuid: offer.uuid,
            ciphertext,
        })
        .encode();

        self.state.remote_uuid = Some(offer.uuid);
        self.state.ratchet = Some(ratchet);
        self.state.identity = None;
        self.state.prekey = None;
        debug!(
            uuid = %hex::encode(self.state.local_uuid),
            peer = %offer.nickname(),
            "session established, acknowledging offer"
        );

        Ok(ack)
    }

    fn receive_ack(&mut self, ack: Ack, rng: &Rng) -> Result<(), SessionError> {
        if self.state.ratchet.is_some() {
            return Err(SessionError::UnexpectedMessage("ack"));
        }
        let Some(prekey) = self.state.prekey.clone() else {
            return Err(SessionError::UnexpectedMessage("ack"));
        };
        let identity = self
            .state
            .identity
            .as_ref()
            .ok_or(SessionError::MissingIdentity)?;

        let their_identity =
            ed25519::public_from_bytes(&ack.identity_key).map_err(|_| SessionError::BadPeer)?;
        if !self.verify_peer.verify_peer(&their_identity) {
            return Err(SessionError::BadPeer);
        }

        let keys = x3dh::complete(
            identity,
            &their_identity,
            &prekey,
            &PublicKey::from_bytes(ack.ephemeral_key),
        )?;

        let mut ratchet =
            DoubleRatchet::passive(keys.session_key, keys.associated_data, prekey.into_secret());
        let initial_payload = match ratchet.decrypt(&ack.ciphertext, rng) {
            Ok(plaintext) if plaintext.len() >= UUID_SIZE => plaintext,
            result => {
                // A bogus acknowledgement burns this handshake attempt; the offer's pre-key
                // must not be reused.
                self.state.prekey = None;
                result?;
                return Err(SessionError::Ratchet(RatchetError::MalformedMessage));
            }
        };

        let mut remote_uuid = [0u8; UUID_SIZE];
        remote_uuid.copy_from_slice(&initial_payload[..UUID_SIZE]);

        self.state.remote_uuid = Some(remote_uuid);
        self.state.ratchet = Some(ratchet);
        self.state.identity = None;
        self.state.prekey = None;
        debug!(uuid = %hex::encode(self.state.local_uuid), "session established, offer acknowledged");

        Ok(())
    }

    fn receive_data(&mut self, data: Data, rng: &Rng) -> Result<Vec<u8>, SessionError> {
        let Some(ratchet) = self.state.ratchet.as_mut() else {
            return Err(SessionError::UnexpectedMessage("data"));
        };
        Ok(ratchet.decrypt(&data.ciphertext, rng)?)
    }

    /// Encrypts a message to the peer. Only legal while the session is active.
    pub fn send(&mut self, plaintext: &[u8], rng: &Rng) -> Result<String, SessionError> {
        let remote_uuid = self.state.remote_uuid.ok_or(SessionError::NotActive)?;
        let Some(ratchet) = self.state.ratchet.as_mut() else {
            return Err(SessionError::NotActive);
        };

        let ciphertext = ratchet.encrypt(plaintext, rng)?;
        let uuid = stamp_uuid(remote_uuid, self.clock.now_millis());

        Ok(Envelope::Data(Data { uuid, ciphertext }).encode())
    }

    /// Closes this session and produces the message telling the peer to do the same.
    ///
    /// Local state is reset, so the session may be reused for a new handshake (after
    /// [`Session::set_identity`]).
    pub fn close(&mut self) -> Result<String, SessionError> {
        let uuid = self.state.remote_uuid.unwrap_or([0; UUID_SIZE]);
        self.reset();
        debug!(uuid = %hex::encode(self.state.local_uuid), "closed session");

        Ok(Envelope::Close(Close { uuid }).encode())
    }

    fn reset(&mut self) {
        self.state.prekey = None;
        self.state.ratchet = None;
    }

    /// Serializes the session state into a stable binary record.
    ///
    /// Restore with [`Session::from_bytes`]. Records of active sessions contain no identity
    /// secrets.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        Ok(cbor::encode(&self.state)?)
    }

    /// Restores a serialized session. The capabilities are not part of the record and must be
    /// supplied again; the clock defaults to wall time and can be replaced with
    /// [`Session::with_clock`].
    pub fn from_bytes(bytes: &[u8], verify_peer: Box<dyn VerifyPeer>) -> Result<Self, SessionError> {
        Ok(Self {
            state: cbor::decode(bytes)?,
            verify_peer,
            clock: Box::new(SystemClock),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_uuid", &hex::encode(self.state.local_uuid))
            .field("nickname", &self.state.nickname)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Overwrites the low 48 bits of an outbound UUID with an epoch-millisecond timestamp.
fn stamp_uuid(mut uuid: SessionUuid, now_millis: u64) -> SessionUuid {
    uuid[10..].copy_from_slice(&now_millis.to_be_bytes()[2..]);
    uuid
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("peer identity key was rejected")]
    BadPeer,

    #[error("received an unexpected {0} message in the current session state")]
    UnexpectedMessage(&'static str),

    #[error("session already has a pending or established handshake")]
    NotEmpty,

    #[error("session is not active")]
    NotActive,

    #[error("session has no identity key")]
    MissingIdentity,

    #[error(transparent)]
    X3dh(X3dhError),

    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error(transparent)]
    Sealed(#[from] SealedError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<X3dhError> for SessionError {
    fn from(err: X3dhError) -> Self {
        match err {
            // A forged pre-key signature means the offer does not come from the claimed
            // identity.
            X3dhError::PreKeySignature => SessionError::BadPeer,
            other => SessionError::X3dh(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::ed25519::IdentityKey;

    use super::{Received, Session, SessionError};

    fn session(uuid_byte: u8, nickname: &str, rng: &Rng) -> Session {
        let identity = IdentityKey::generate(rng).unwrap();
        Session::new(
            [uuid_byte; 16],
            nickname,
            identity,
            Box::new(|_: &ed25519_dalek::VerifyingKey| true),
        )
    }

    fn establish(rng: &Rng) -> (Session, Session) {
        let mut alice = session(1, "alice", rng);
        let mut bob = session(2, "bob", rng);

        let offer = alice.offer(rng).unwrap();
        let ack = bob.acknowledge(&offer, rng).unwrap();
        assert_eq!(alice.receive(&ack, rng).unwrap(), Received::Established);

        (alice, bob)
    }

    #[test]
    fn handshake_links_both_sessions() {
        let rng = Rng::from_seed([1; 32]);
        let (alice, bob) = establish(&rng);

        assert!(alice.is_active());
        assert!(bob.is_active());
        assert_eq!(alice.remote_uuid(), Some(bob.local_uuid()));
        assert_eq!(bob.remote_uuid(), Some(alice.local_uuid()));
    }

    #[test]
    fn offer_requires_empty_state() {
        let rng = Rng::from_seed([1; 32]);
        let mut alice = session(1, "alice", &rng);

        alice.offer(&rng).unwrap();
        assert!(matches!(alice.offer(&rng), Err(SessionError::NotEmpty)));
    }

    #[test]
    fn rejected_peer_aborts_handshake() {
        let rng = Rng::from_seed([1; 32]);
        let mut alice = session(1, "alice", &rng);
        let identity = IdentityKey::generate(&rng).unwrap();
        let mut bob = Session::new(
            [2; 16],
            "bob",
            identity,
            Box::new(|_: &ed25519_dalek::VerifyingKey| false),
        );

        let offer = alice.offer(&rng).unwrap();
        assert!(matches!(
            bob.acknowledge(&offer, &rng),
            Err(SessionError::BadPeer)
        ));
        assert!(!bob.is_active());
    }

    #[test]
    fn data_before_establishment_is_protocol_error() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, _bob) = establish(&rng);
        let mut carol = session(3, "carol", &rng);

        let message = alice.send(b"hi", &rng).unwrap();
        assert!(matches!(
            carol.receive(&message, &rng),
            Err(SessionError::UnexpectedMessage("data"))
        ));
    }

    #[test]
    fn ack_while_active_is_protocol_error() {
        let rng = Rng::from_seed([1; 32]);

        let mut alice = session(1, "alice", &rng);
        let mut bob = session(2, "bob", &rng);

        let offer = alice.offer(&rng).unwrap();
        let ack = bob.acknowledge(&offer, &rng).unwrap();
        assert_eq!(alice.receive(&ack, &rng).unwrap(), Received::Established);

        assert!(matches!(
            alice.receive(&ack, &rng),
            Err(SessionError::UnexpectedMessage("ack"))
        ));
    }

    #[test]
    fn close_resets_and_is_idempotent() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, mut bob) = establish(&rng);

        let close = alice.close().unwrap();
        assert!(!alice.is_active());

        assert_eq!(bob.receive(&close, &rng).unwrap(), Received::Closed);
        assert!(!bob.is_active());

        // A second close changes nothing and is not an error.
        assert_eq!(bob.receive(&close, &rng).unwrap(), Received::Closed);
        assert!(!bob.is_active());
    }

    #[test]
    fn send_after_close_fails() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice, _bob) = establish(&rng);

        alice.close().unwrap();
        assert!(matches!(
            alice.send(b"hi", &rng),
            Err(SessionError::NotActive)
        ));
    }

    #[test]
    fn stamped_uuid_keeps_high_bits() {
        let uuid = super::stamp_uuid([0xaa; 16], 0x0123_4567_89ab);

        assert_eq!(&uuid[..10], &[0xaa; 10]);
        assert_eq!(&uuid[10..], &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);
    }
}

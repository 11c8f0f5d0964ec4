// SPDX-License-Identifier: MIT OR Apache-2.0

//! `chinampa` provides two-party end-to-end encryption for untrusted transports, combining an
//! X3DH-style initial key agreement with a Double Ratchet for forward-secret, self-healing
//! bidirectional messaging.
//!
//! This implementation is transport-agnostic: a [`Session`] consumes and produces printable
//! message strings which can be shipped over HTTP, a message bus, email or anything 7-bit safe.
//! Moving those strings between peers, discovering identity keys for a peer address and storing
//! serialized session state are left to the application.
//!
//! ## Protocol
//!
//! The offering party "upgrades" a conversation by publishing an *offer* which advertises its
//! long-term Ed25519 identity key and a signed X25519 pre-key. The receiving party verifies the
//! pre-key signature, derives the initial shared secret (X3DH), constructs its messaging ratchet
//! and answers with an *acknowledgement* carrying an ephemeral public key. Once the offering
//! party consumes the acknowledgement, both sides hold an established [`Session`] and exchange
//! encrypted *data* messages. Either side may *close* the session at any time.
//!
//! Message encryption uses a ratchet similar to Signal's [Double Ratchet
//! algorithm](https://signal.org/docs/specifications/doubleratchet/): a symmetric KDF chain per
//! direction provides forward secrecy for every single message, while a Diffie-Hellman "outer"
//! ratchet re-keys both chains whenever a fresh public value arrives, healing the session after
//! a state compromise. Messages arriving out of order or getting lost are tolerated within
//! bounded limits; the bounds cap the damage a malicious peer can cause by claiming huge numbers
//! of skipped messages.
//!
//! ## Wire format
//!
//! Messages travel as `!RAT!<type><base64url>!CHT!` strings. Offers may additionally be *sealed*
//! into an anonymous box addressed to the recipient's identity, hiding the sender's nickname and
//! identity key from on-path observers. See the [`envelope`] module for the exact layouts.
//!
//! ## Persistence
//!
//! A session (including its ratchet and all buffered message keys) serializes into a
//! self-describing binary record via [`Session::to_bytes`] and resumes with
//! [`Session::from_bytes`], so sessions survive process restarts. Identity secrets are dropped
//! from the session once the handshake completes and are never part of an active session's
//! serialized state.
//!
//! ## Security
//!
//! Encryption helps to prevent your data being readable by third parties but it can never
//! guarantee full security, especially on devices or transport channels you do not control.
//! Identity verification is delegated to the application through the [`VerifyPeer`] capability;
//! whether a peer's key is trustworthy (key directory, out-of-band comparison, trust on first
//! use) is out of scope here.
mod cbor;
mod crypto;
pub mod envelope;
mod ratchet;
mod session;
mod traits;
mod x3dh;

#[cfg(test)]
mod tests;

pub use cbor::{DecodeError, EncodeError};
pub use crypto::ed25519::{Ed25519Error, IdentityKey, public_to_x25519};
pub use crypto::x25519::{PublicKey, SecretKey, X25519Error};
pub use crypto::{Rng, RngError};
pub use ratchet::{DoubleRatchet, RatchetError};
pub use session::{Received, Session, SessionError, SessionUuid};
pub use traits::{Clock, SystemClock, VerifyPeer};
pub use x3dh::{SignedPreKey, X3dhError};

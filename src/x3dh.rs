// SPDX-License-Identifier: MIT OR Apache-2.0

//! X3DH key agreement bootstrapping a session between two long-term identities.
//!
//! <https://signal.org/docs/specifications/x3dh/>
//!
//! The offerer advertises a signed pre-key. The responder verifies the signature, generates an
//! ephemeral key and mixes three Diffie-Hellman outputs into the initial session key:
//!
//! ```plain
//! DH1 = DH(identity_responder, prekey_offerer)
//! DH2 = DH(ephemeral,          identity_offerer)
//! DH3 = DH(ephemeral,          prekey_offerer)
//! ```
//!
//! Identity keys are Ed25519 and enter the exchanges in their X25519 form. Both parties bind the
//! two identity public keys (offerer first) as associated data into every later AEAD call.
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::ed25519::{self, IdentityKey};
use crate::crypto::hkdf::{HkdfError, HkdfSha256};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError, Secret};
use crate::ratchet::{ASSOCIATED_DATA_SIZE, ROOT_KEY_SIZE};

const INFO_X3DH: &[u8; 16] = b"x3dh-session-key";

/// Ephemeral X25519 keypair whose public part is signed by the offerer's identity and
/// advertised in the offer. Retained until the acknowledgement is processed, then discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPreKey {
    secret_key: SecretKey,
    public_key: PublicKey,
    #[serde(with = "serde_bytes")]
    signature: [u8; ed25519::SIGNATURE_SIZE],
}

impl SignedPreKey {
    /// Generates a pre-key and signs its public part with the identity key.
    pub(crate) fn generate(identity: &IdentityKey, rng: &Rng) -> Result<Self, X3dhError> {
        let secret_key = SecretKey::generate(rng)?;
        let public_key = secret_key.public_key();
        let signature = identity.sign(public_key.as_bytes());

        Ok(Self {
            secret_key,
            public_key,
            signature: signature.to_bytes(),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn signature(&self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.signature)
    }

    /// Consumes the pre-key, handing its secret over to the messaging ratchet.
    pub(crate) fn into_secret(self) -> SecretKey {
        self.secret_key
    }
}

/// Session key and associated data shared by both parties after the agreement.
pub(crate) struct InitialKeys {
    pub session_key: Secret<ROOT_KEY_SIZE>,
    pub associated_data: [u8; ASSOCIATED_DATA_SIZE],
}

/// Runs the responder side: verify the offered pre-key, generate an ephemeral key and derive
/// the initial session key. The returned public key must reach the offerer.
pub(crate) fn initiate(
    identity: &IdentityKey,
    their_identity: &VerifyingKey,
    their_prekey: &PublicKey,
    their_prekey_signature: &ed25519_dalek::Signature,
    rng: &Rng,
) -> Result<(InitialKeys, PublicKey), X3dhError> {
    ed25519::verify(their_identity, their_prekey.as_bytes(), their_prekey_signature)
        .map_err(|_| X3dhError::PreKeySignature)?;

    let ephemeral_secret = SecretKey::generate(rng)?;
    let ephemeral_public = ephemeral_secret.public_key();

    let their_identity_x25519 = ed25519::public_to_x25519(their_identity);

    let dh1 = identity.to_x25519().diffie_hellman(their_prekey)?;
    let dh2 = ephemeral_secret.diffie_hellman(&their_identity_x25519)?;
    let dh3 = ephemeral_secret.diffie_hellman(their_prekey)?;

    let keys = InitialKeys {
        session_key: derive_session_key(&dh1, &dh2, &dh3)?,
        associated_data: associated_data(their_identity, &identity.public_key()),
    };

    Ok((keys, ephemeral_public))
}

/// Runs the offerer side with the responder's ephemeral key, producing the same session key and
/// associated data as [`initiate`].
pub(crate) fn complete(
    identity: &IdentityKey,
    their_identity: &VerifyingKey,
    prekey: &SignedPreKey,
    their_ephemeral: &PublicKey,
) -> Result<InitialKeys, X3dhError> {
    let their_identity_x25519 = ed25519::public_to_x25519(their_identity);

    let dh1 = prekey.secret_key.diffie_hellman(&their_identity_x25519)?;
    let dh2 = identity.to_x25519().diffie_hellman(their_ephemeral)?;
    let dh3 = prekey.secret_key.diffie_hellman(their_ephemeral)?;

    Ok(InitialKeys {
        session_key: derive_session_key(&dh1, &dh2, &dh3)?,
        associated_data: associated_data(&identity.public_key(), their_identity),
    })
}

fn derive_session_key(
    dh1: &Secret<32>,
    dh2: &Secret<32>,
    dh3: &Secret<32>,
) -> Result<Secret<ROOT_KEY_SIZE>, X3dhError> {
    let mut ikm = [0u8; 96];
    ikm[..32].copy_from_slice(dh1.as_bytes());
    ikm[32..64].copy_from_slice(dh2.as_bytes());
    ikm[64..].copy_from_slice(dh3.as_bytes());

    let session_key = HkdfSha256::new(None, &ikm)?.expand(INFO_X3DH)?;
    Ok(Secret::from_bytes(session_key))
}

fn associated_data(
    offerer: &VerifyingKey,
    responder: &VerifyingKey,
) -> [u8; ASSOCIATED_DATA_SIZE] {
    let mut out = [0u8; ASSOCIATED_DATA_SIZE];
    out[..32].copy_from_slice(offerer.as_bytes());
    out[32..].copy_from_slice(responder.as_bytes());
    out
}

#[derive(Debug, Error)]
pub enum X3dhError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("pre-key signature does not match the offered identity")]
    PreKeySignature,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::ed25519::IdentityKey;

    use super::{SignedPreKey, X3dhError, complete, initiate};

    #[test]
    fn both_parties_derive_the_same_keys() {
        let rng = Rng::from_seed([1; 32]);

        let alice = IdentityKey::generate(&rng).unwrap();
        let bob = IdentityKey::generate(&rng).unwrap();

        let prekey = SignedPreKey::generate(&alice, &rng).unwrap();

        let (bob_keys, ephemeral_public) = initiate(
            &bob,
            &alice.public_key(),
            prekey.public_key(),
            &prekey.signature(),
            &rng,
        )
        .unwrap();
        let alice_keys = complete(&alice, &bob.public_key(), &prekey, &ephemeral_public).unwrap();

        assert_eq!(alice_keys.session_key, bob_keys.session_key);
        assert_eq!(alice_keys.associated_data, bob_keys.associated_data);
    }

    #[test]
    fn forged_prekey_signature_is_rejected() {
        let rng = Rng::from_seed([1; 32]);

        let alice = IdentityKey::generate(&rng).unwrap();
        let bob = IdentityKey::generate(&rng).unwrap();
        let mallory = IdentityKey::generate(&rng).unwrap();

        // Pre-key signed by Mallory but presented under Alice's identity.
        let prekey = SignedPreKey::generate(&mallory, &rng).unwrap();

        assert!(matches!(
            initiate(
                &bob,
                &alice.public_key(),
                prekey.public_key(),
                &prekey.signature(),
                &rng,
            ),
            Err(X3dhError::PreKeySignature)
        ));
    }
}

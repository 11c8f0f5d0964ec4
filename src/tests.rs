// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol-level scenarios exercising handshake, message exchange, persistence and teardown
//! across two live sessions.
use ed25519_dalek::VerifyingKey;

use crate::crypto::Rng;
use crate::crypto::ed25519::IdentityKey;
use crate::envelope::Envelope;
use crate::session::{Received, Session, SessionError};
use crate::traits::Clock;

struct FixedClock(u64);

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0
    }
}

fn accept_any() -> Box<dyn crate::traits::VerifyPeer> {
    Box::new(|_: &VerifyingKey| true)
}

fn accept_only(key: VerifyingKey) -> Box<dyn crate::traits::VerifyPeer> {
    Box::new(move |peer: &VerifyingKey| peer == &key)
}

fn alice_uuid() -> [u8; 16] {
    [0; 16]
}

fn bob_uuid() -> [u8; 16] {
    let mut uuid = [0u8; 16];
    uuid[0] = 0x01;
    uuid
}

fn establish(rng: &Rng) -> (Session, Session) {
    let alice_identity = IdentityKey::generate(rng).unwrap();
    let bob_identity = IdentityKey::generate(rng).unwrap();

    let mut alice = Session::new(
        alice_uuid(),
        "alice@example.com",
        alice_identity.clone(),
        accept_only(bob_identity.public_key()),
    );
    let mut bob = Session::new(
        bob_uuid(),
        "bob@example.com",
        bob_identity,
        accept_only(alice_identity.public_key()),
    );

    let offer = alice.offer(rng).unwrap();
    let ack = bob.acknowledge(&offer, rng).unwrap();
    assert_eq!(alice.receive(&ack, rng).unwrap(), Received::Established);

    (alice, bob)
}

fn base64_payload(message: &str) -> Vec<u8> {
    use base64::Engine;
    let body = message
        .strip_prefix(crate::envelope::PREFIX)
        .unwrap()
        .strip_suffix(crate::envelope::SUFFIX)
        .unwrap();
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(&body[1..])
        .unwrap()
}

#[test]
fn handshake_and_exchange() {
    let rng = Rng::from_seed([1; 32]);

    let alice_identity = IdentityKey::generate(&rng).unwrap();
    let bob_identity = IdentityKey::generate(&rng).unwrap();

    let mut alice = Session::new(
        alice_uuid(),
        "alice@example.com",
        alice_identity.clone(),
        accept_any(),
    );
    let mut bob = Session::new(bob_uuid(), "bob@example.com", bob_identity.clone(), accept_any());

    // The offer advertises Alice's identity key in the clear.
    let offer = alice.offer(&rng).unwrap();
    assert!(offer.starts_with("!RAT!1"));
    assert!(offer.ends_with("!CHT!"));
    assert_eq!(
        &base64_payload(&offer)[..32],
        alice_identity.public_key().as_bytes(),
    );

    // The acknowledgement leads with Bob's identity key.
    let ack = bob.acknowledge(&offer, &rng).unwrap();
    assert!(ack.starts_with("!RAT!2"));
    assert_eq!(
        &base64_payload(&ack)[..32],
        bob_identity.public_key().as_bytes(),
    );

    assert_eq!(alice.receive(&ack, &rng).unwrap(), Received::Established);
    assert!(alice.is_active());
    assert!(bob.is_active());
    assert_eq!(alice.remote_uuid(), Some(&bob_uuid()));
    assert_eq!(bob.remote_uuid(), Some(&alice_uuid()));

    // First exchanges in both directions.
    let message = alice.send(b"hello", &rng).unwrap();
    assert!(message.starts_with("!RAT!3"));
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"hello".to_vec()),
    );

    let message = bob.send(b"yoyo", &rng).unwrap();
    assert_eq!(
        alice.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"yoyo".to_vec()),
    );

    // Closing produces a 17-byte payload: Bob's UUID plus the sentinel.
    let close = alice.close().unwrap();
    assert!(close.starts_with("!RAT!4"));
    assert_eq!(base64_payload(&close).len(), 17);

    assert_eq!(bob.receive(&close, &rng).unwrap(), Received::Closed);
    assert!(!bob.is_active());
}

#[test]
fn long_conversations_in_both_directions() {
    let rng = Rng::from_seed([2; 32]);
    let (mut alice, mut bob) = establish(&rng);

    for round in 0..12u32 {
        let payload = format!("ping {round}");
        let message = alice.send(payload.as_bytes(), &rng).unwrap();
        assert_eq!(
            bob.receive(&message, &rng).unwrap(),
            Received::Plaintext(payload.into_bytes()),
        );

        let payload = format!("pong {round}");
        let message = bob.send(payload.as_bytes(), &rng).unwrap();
        assert_eq!(
            alice.receive(&message, &rng).unwrap(),
            Received::Plaintext(payload.into_bytes()),
        );
    }
}

#[test]
fn one_sided_burst() {
    let rng = Rng::from_seed([3; 32]);
    let (mut alice, mut bob) = establish(&rng);

    for round in 0..40u32 {
        let payload = format!("burst {round}");
        let message = alice.send(payload.as_bytes(), &rng).unwrap();
        assert_eq!(
            bob.receive(&message, &rng).unwrap(),
            Received::Plaintext(payload.into_bytes()),
        );
    }
}

#[test]
fn tolerates_reordering_and_loss() {
    let rng = Rng::from_seed([4; 32]);
    let (mut alice, mut bob) = establish(&rng);

    // A batch delivered back to front.
    let batch: Vec<String> = (0..8)
        .map(|i| alice.send(format!("m{i}").as_bytes(), &rng).unwrap())
        .collect();
    for (i, message) in batch.iter().enumerate().rev() {
        assert_eq!(
            bob.receive(message, &rng).unwrap(),
            Received::Plaintext(format!("m{i}").into_bytes()),
        );
    }

    // Losses are fine as long as the gap stays within the skip limit.
    for i in 0..8 {
        let message = alice.send(format!("n{i}").as_bytes(), &rng).unwrap();
        if i % 3 == 0 {
            assert_eq!(
                bob.receive(&message, &rng).unwrap(),
                Received::Plaintext(format!("n{i}").into_bytes()),
            );
        }
    }

    // A message held back across a full ratchet round trip still decrypts.
    let stale = alice.send(b"stale", &rng).unwrap();
    let fresh = alice.send(b"fresh", &rng).unwrap();
    assert_eq!(
        bob.receive(&fresh, &rng).unwrap(),
        Received::Plaintext(b"fresh".to_vec()),
    );
    let reply = bob.send(b"reply", &rng).unwrap();
    assert_eq!(
        alice.receive(&reply, &rng).unwrap(),
        Received::Plaintext(b"reply".to_vec()),
    );
    let next = alice.send(b"next", &rng).unwrap();
    assert_eq!(
        bob.receive(&next, &rng).unwrap(),
        Received::Plaintext(b"next".to_vec()),
    );
    assert_eq!(
        bob.receive(&stale, &rng).unwrap(),
        Received::Plaintext(b"stale".to_vec()),
    );
}

#[test]
fn skip_bound_rejection_keeps_state_identical() {
    let rng = Rng::from_seed([5; 32]);
    let (mut alice, mut bob) = establish(&rng);

    let mut last = String::new();
    for _ in 0..34 {
        last = alice.send(b"never delivered", &rng).unwrap();
    }

    let before = bob.to_bytes().unwrap();
    assert!(matches!(
        bob.receive(&last, &rng),
        Err(SessionError::Ratchet(_)),
    ));
    assert_eq!(bob.to_bytes().unwrap(), before);
}

#[test]
fn replayed_data_is_rejected() {
    let rng = Rng::from_seed([6; 32]);
    let (mut alice, mut bob) = establish(&rng);

    let message = alice.send(b"once only", &rng).unwrap();
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"once only".to_vec()),
    );

    assert!(matches!(
        bob.receive(&message, &rng),
        Err(SessionError::Ratchet(_)),
    ));
}

#[test]
fn old_snapshot_cannot_read_later_messages() {
    let rng = Rng::from_seed([7; 32]);
    let (mut alice, mut bob) = establish(&rng);

    // Snapshot Bob, then let the ratchet heal through two full round trips.
    let snapshot = bob.to_bytes().unwrap();

    for _ in 0..2 {
        let message = alice.send(b"forward", &rng).unwrap();
        bob.receive(&message, &rng).unwrap();
        let message = bob.send(b"back", &rng).unwrap();
        alice.receive(&message, &rng).unwrap();
    }

    let message = alice.send(b"for current bob only", &rng).unwrap();

    let mut stale_bob = Session::from_bytes(&snapshot, accept_any()).unwrap();
    assert!(stale_bob.receive(&message, &rng).is_err());

    // The live session still reads it.
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"for current bob only".to_vec()),
    );
}

#[test]
fn sessions_survive_serialization() {
    let rng = Rng::from_seed([8; 32]);
    let (mut alice, mut bob) = establish(&rng);

    let message = alice.send(b"before restart", &rng).unwrap();
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"before restart".to_vec()),
    );

    let mut alice = Session::from_bytes(&alice.to_bytes().unwrap(), accept_any()).unwrap();
    let mut bob = Session::from_bytes(&bob.to_bytes().unwrap(), accept_any()).unwrap();

    let message = alice.send(b"after restart", &rng).unwrap();
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"after restart".to_vec()),
    );
    let message = bob.send(b"back at you", &rng).unwrap();
    assert_eq!(
        alice.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"back at you".to_vec()),
    );
}

#[test]
fn pending_session_survives_serialization() {
    let rng = Rng::from_seed([9; 32]);

    let mut alice = Session::new(
        alice_uuid(),
        "alice@example.com",
        IdentityKey::generate(&rng).unwrap(),
        accept_any(),
    );
    let mut bob = Session::new(
        bob_uuid(),
        "bob@example.com",
        IdentityKey::generate(&rng).unwrap(),
        accept_any(),
    );

    let offer = alice.offer(&rng).unwrap();

    // Alice restarts while her offer is in flight.
    let mut alice = Session::from_bytes(&alice.to_bytes().unwrap(), accept_any()).unwrap();

    let ack = bob.acknowledge(&offer, &rng).unwrap();
    assert_eq!(alice.receive(&ack, &rng).unwrap(), Received::Established);

    let message = alice.send(b"still works", &rng).unwrap();
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"still works".to_vec()),
    );
}

#[test]
fn active_session_records_hold_no_identity_secret() {
    let rng = Rng::from_seed([10; 32]);

    let identity = IdentityKey::generate(&rng).unwrap();
    let seed = identity.to_bytes();

    let mut alice = Session::new(alice_uuid(), "alice@example.com", identity, accept_any());
    let mut bob = Session::new(
        bob_uuid(),
        "bob@example.com",
        IdentityKey::generate(&rng).unwrap(),
        accept_any(),
    );

    let offer = alice.offer(&rng).unwrap();
    let ack = bob.acknowledge(&offer, &rng).unwrap();
    alice.receive(&ack, &rng).unwrap();

    let record = alice.to_bytes().unwrap();
    assert!(!contains(&record, &seed));
}

#[test]
fn outbound_uuid_carries_timestamp() {
    let rng = Rng::from_seed([11; 32]);
    let (alice, _bob) = establish(&rng);

    let mut alice = Session::from_bytes(&alice.to_bytes().unwrap(), accept_any())
        .unwrap()
        .with_clock(Box::new(FixedClock(0x0123_4567_89ab)));

    let message = alice.send(b"when", &rng).unwrap();
    let Envelope::Data(data) = Envelope::parse(&message).unwrap() else {
        panic!("expected data envelope");
    };

    // High 80 bits still route to Bob, the low 48 carry the clock.
    assert_eq!(&data.uuid[..10], &bob_uuid()[..10]);
    assert_eq!(&data.uuid[10..], &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]);
}

#[test]
fn sealed_offer_hides_sender_metadata() {
    let rng = Rng::from_seed([12; 32]);

    let alice_identity = IdentityKey::generate(&rng).unwrap();
    let bob_identity = IdentityKey::generate(&rng).unwrap();

    let mut alice = Session::new(
        alice_uuid(),
        "alice@example.com",
        alice_identity.clone(),
        accept_any(),
    );
    let mut bob = Session::new(bob_uuid(), "bob@example.com", bob_identity.clone(), accept_any());

    let sealed_offer = alice
        .offer_sealed(&bob_identity.x25519_public_key(), &rng)
        .unwrap();
    assert!(sealed_offer.starts_with("!RAT!5"));

    // Neither the nickname nor Alice's identity key shows up in the sealed payload.
    let payload = base64_payload(&sealed_offer);
    assert!(!contains(&payload, b"alice@example.com"));
    assert!(!contains(&payload, alice_identity.public_key().as_bytes()));

    // Only Bob can open it; a third party fails.
    let mut carol = Session::new(
        [3; 16],
        "carol@example.com",
        IdentityKey::generate(&rng).unwrap(),
        accept_any(),
    );
    assert!(matches!(
        carol.receive(&sealed_offer, &rng),
        Err(SessionError::Sealed(_)),
    ));

    // Bob answers it like a plain offer and the session comes up.
    let Received::Acknowledged(ack) = bob.receive(&sealed_offer, &rng).unwrap() else {
        panic!("expected acknowledgement");
    };
    assert_eq!(alice.receive(&ack, &rng).unwrap(), Received::Established);

    let message = alice.send(b"hidden handshake", &rng).unwrap();
    assert_eq!(
        bob.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"hidden handshake".to_vec()),
    );
}

#[test]
fn closed_session_can_be_rearmed() {
    let rng = Rng::from_seed([13; 32]);

    let alice_identity = IdentityKey::generate(&rng).unwrap();
    let bob_identity = IdentityKey::generate(&rng).unwrap();

    let mut alice = Session::new(
        alice_uuid(),
        "alice@example.com",
        alice_identity.clone(),
        accept_any(),
    );
    let mut bob = Session::new(bob_uuid(), "bob@example.com", bob_identity.clone(), accept_any());

    let offer = alice.offer(&rng).unwrap();
    let ack = bob.acknowledge(&offer, &rng).unwrap();
    alice.receive(&ack, &rng).unwrap();

    let close = alice.close().unwrap();
    bob.receive(&close, &rng).unwrap();

    // Both sides re-arm and handshake again with fresh key material.
    alice.set_identity(alice_identity);
    bob.set_identity(bob_identity);

    let offer = alice.offer(&rng).unwrap();
    let ack = bob.acknowledge(&offer, &rng).unwrap();
    assert_eq!(alice.receive(&ack, &rng).unwrap(), Received::Established);

    let message = bob.send(b"second life", &rng).unwrap();
    assert_eq!(
        alice.receive(&message, &rng).unwrap(),
        Received::Plaintext(b"second life".to_vec()),
    );
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

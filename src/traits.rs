// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits a session is configured with at construction.
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::VerifyingKey;

/// Decides whether a peer's identity key is acceptable.
///
/// Invoked for every inbound offer and acknowledgement. How to establish trust in a key (a key
/// directory, out-of-band comparison, trust on first use) is up to the application; the
/// predicate must not assume a particular strategy and never mutates session state.
pub trait VerifyPeer: Send + Sync {
    fn verify_peer(&self, identity_key: &VerifyingKey) -> bool;
}

impl<F> VerifyPeer for F
where
    F: Fn(&VerifyingKey) -> bool + Send + Sync,
{
    fn verify_peer(&self, identity_key: &VerifyingKey) -> bool {
        self(identity_key)
    }
}

/// Source of millisecond timestamps for outbound message identifiers.
///
/// Passing the clock in explicitly keeps the core deterministic under test.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall-time clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

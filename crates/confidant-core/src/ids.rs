//! Entity identifiers.
//!
//! Ids are creation-time ordinals: milliseconds since the Unix epoch, bumped
//! forward whenever two entities are created within the same millisecond so
//! that a generator never hands out the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

/// Largest id the generator adopts from storage (`i64::MAX`, the range of
/// millisecond timestamps).
pub const MAX_ID: u64 = i64::MAX as u64;

/// Identifier of a memory, voice sample, message, session or conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EntityId)
    }
}

/// Monotonic id source seeded from the wall clock.
///
/// Every call to [`IdGenerator::next`] returns a value strictly greater than
/// the previous one, even if the clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the floor to at least `seen`, so ids loaded from disk are
    /// never handed out again.
    ///
    /// Ids above [`MAX_ID`] are ignored: no generated id can reach them, so
    /// they cannot collide, and adopting one would exhaust the id space.
    pub fn observe(&self, seen: EntityId) {
        if seen.0 > MAX_ID {
            warn!("Ignoring out-of-range stored id {seen}");
            return;
        }
        self.last.fetch_max(seen.0, Ordering::AcqRel);
    }

    pub fn next(&self) -> EntityId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return EntityId(candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

use crate::ids::ClientId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Total-ordered, lexicographically sortable operation timestamp.
///
/// A timestamp is a wall-clock instant (milliseconds since the epoch) paired with a
/// per-client logical counter that disambiguates operations minted within the same
/// millisecond, suffixed with the originating client id so that no two clients can ever
/// produce the same value. Ordering is defined over `(millis, logical, client_id)`, which
/// is exactly the order `Ord` derives below.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp {
    millis: u64,
    logical: u32,
    client_id: ClientId,
}

impl Timestamp {
    pub fn new(millis: u64, logical: u32, client_id: ClientId) -> Self {
        Self {
            millis,
            logical,
            client_id,
        }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn logical(&self) -> u32 {
        self.logical
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Encode as a fixed-width, lexicographically sortable string suitable for wire transport
    /// and as a SQL `TEXT PRIMARY KEY`.
    pub fn to_sortable_string(&self) -> String {
        format!("{:020}-{:010}-{}", self.millis, self.logical, self.client_id)
    }

    pub fn from_sortable_string(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '-');
        let millis: u64 = parts.next()?.parse().ok()?;
        let logical: u32 = parts.next()?.parse().ok()?;
        let client_id = parts.next()?.to_string();
        if client_id.is_empty() {
            return None;
        }
        Some(Self {
            millis,
            logical,
            client_id: ClientId(client_id),
        })
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sortable_string())
    }
}

/// Pluggable clock so replicas and the Relay can each mint monotonic, collision-free
/// timestamps while observing each other's.
pub trait Clock {
    /// Mint a fresh timestamp strictly greater than any previously minted or observed one.
    fn tick(&mut self) -> Timestamp;
    /// Fold an externally-observed timestamp into the clock so future `tick()`s stay ahead of it.
    fn observe(&mut self, external: &Timestamp);
    /// The highest timestamp minted or observed so far, if any.
    fn now(&self) -> Option<Timestamp>;
}

/// Hybrid logical clock: wall-clock milliseconds with a logical tie-breaker, so concurrent
/// ticks on one client still order strictly, while staying roughly chronological across
/// replicas instead of drifting the way a purely logical counter would.
pub struct HybridClock {
    client_id: ClientId,
    last_millis: u64,
    last_logical: u32,
}

impl HybridClock {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            last_millis: 0,
            last_logical: 0,
        }
    }

    fn wall_millis() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

impl Clock for HybridClock {
    fn tick(&mut self) -> Timestamp {
        let wall = Self::wall_millis();
        if wall > self.last_millis {
            self.last_millis = wall;
            self.last_logical = 0;
        } else {
            self.last_logical += 1;
        }
        Timestamp::new(self.last_millis, self.last_logical, self.client_id.clone())
    }

    fn observe(&mut self, external: &Timestamp) {
        if external.millis > self.last_millis
            || (external.millis == self.last_millis && external.logical > self.last_logical)
        {
            self.last_millis = external.millis;
            self.last_logical = external.logical;
        }
    }

    fn now(&self) -> Option<Timestamp> {
        if self.last_millis == 0 {
            None
        } else {
            Some(Timestamp::new(
                self.last_millis,
                self.last_logical,
                self.client_id.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sortable_string_round_trips() {
        let ts = Timestamp::new(1_700_000_000_123, 7, ClientId::from("alice"));
        let s = ts.to_sortable_string();
        let parsed = Timestamp::from_sortable_string(&s).unwrap();
        assert_eq!(ts, parsed);
    }

    #[test]
    fn lexicographic_order_matches_field_order() {
        let a = Timestamp::new(100, 0, ClientId::from("a"));
        let b = Timestamp::new(100, 1, ClientId::from("a"));
        let c = Timestamp::new(101, 0, ClientId::from("a"));
        assert!(a < b);
        assert!(b < c);
        assert!(a.to_sortable_string() < b.to_sortable_string());
        assert!(b.to_sortable_string() < c.to_sortable_string());
    }

    #[test]
    fn clock_ticks_are_monotonic_and_observe_advances() {
        let mut clock = HybridClock::new(ClientId::from("alice"));
        let t1 = clock.tick();
        let t2 = clock.tick();
        assert!(t1 < t2);

        let mut other = HybridClock::new(ClientId::from("bob"));
        other.observe(&t2);
        let t3 = other.tick();
        assert!(t3 > t2);
    }
}

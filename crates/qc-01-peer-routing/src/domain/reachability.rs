//! Round-scoped reachability bookkeeping.
//!
//! A tally lives for exactly one verification round and is discarded once
//! any address settles.

use std::collections::{HashMap, HashSet};

use crate::domain::{NetworkAddress, NetworkSegment};

/// Result of recording one verifier response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyVerdict {
    /// No threshold reached yet
    Pending,
    /// Address reached the success threshold
    Confirmed(NetworkAddress),
    /// Address reached the failure threshold
    Rejected(NetworkAddress),
    /// A threshold already fired this round. Response ignored.
    Settled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialCounts {
    pub success: usize,
    pub failure: usize,
}

/// Per-address success/failure counts for one round.
///
/// The first address to reach `threshold` in either column settles the
/// whole tally. Everything after that is a no-op.
#[derive(Debug, Clone)]
pub struct ReachabilityTally {
    threshold: usize,
    counts: HashMap<NetworkAddress, DialCounts>,
    settled: bool,
}

impl ReachabilityTally {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: HashMap::new(),
            settled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn counts(&self, addr: &NetworkAddress) -> DialCounts {
        self.counts.get(addr).copied().unwrap_or_default()
    }

    pub fn record_success(&mut self, addr: &NetworkAddress) -> TallyVerdict {
        self.record(addr, true)
    }

    pub fn record_failure(&mut self, addr: &NetworkAddress) -> TallyVerdict {
        self.record(addr, false)
    }

    fn record(&mut self, addr: &NetworkAddress, success: bool) -> TallyVerdict {
        if self.settled {
            return TallyVerdict::Settled;
        }

        let entry = self.counts.entry(addr.clone()).or_default();
        if success {
            entry.success += 1;
        } else {
            entry.failure += 1;
        }

        let verdict = if entry.success >= self.threshold {
            TallyVerdict::Confirmed(addr.clone())
        } else if entry.failure >= self.threshold {
            TallyVerdict::Rejected(addr.clone())
        } else {
            return TallyVerdict::Pending;
        };

        self.settled = true;
        self.counts.clear();
        verdict
    }
}

/// Network segments that already contributed a confirmation this round.
#[derive(Debug, Clone, Default)]
pub struct SegmentFilter {
    seen: HashSet<NetworkSegment>,
}

impl SegmentFilter {
    /// Returns `false` if the segment was already counted.
    pub fn admit(&mut self, segment: NetworkSegment) -> bool {
        self.seen.insert(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> NetworkAddress {
        text.parse().unwrap()
    }

    #[test]
    fn test_confirmed_after_threshold_successes() {
        let a = addr("/ip4/8.8.8.8/tcp/4001");
        let mut tally = ReachabilityTally::new(4);

        for _ in 0..3 {
            assert_eq!(tally.record_success(&a), TallyVerdict::Pending);
        }
        assert_eq!(tally.record_failure(&a), TallyVerdict::Pending);
        assert_eq!(tally.record_success(&a), TallyVerdict::Confirmed(a.clone()));
        assert!(tally.is_settled());
    }

    #[test]
    fn test_rejected_after_threshold_failures() {
        let a = addr("/ip4/8.8.8.8/tcp/4001");
        let mut tally = ReachabilityTally::new(4);

        for _ in 0..3 {
            tally.record_failure(&a);
        }
        tally.record_success(&a);
        assert_eq!(tally.record_failure(&a), TallyVerdict::Rejected(a.clone()));
    }

    #[test]
    fn test_response_after_threshold_has_no_effect() {
        let a = addr("/ip4/8.8.8.8/tcp/4001");
        let b = addr("/ip4/9.9.9.9/tcp/4001");
        let mut tally = ReachabilityTally::new(4);
        for _ in 0..4 {
            tally.record_success(&a);
        }

        assert_eq!(tally.record_success(&a), TallyVerdict::Settled);
        assert_eq!(tally.record_failure(&b), TallyVerdict::Settled);
        assert_eq!(tally.counts(&a), DialCounts::default());
    }

    #[test]
    fn test_addresses_tallied_independently() {
        let a = addr("/ip4/8.8.8.8/tcp/4001");
        let b = addr("/ip4/9.9.9.9/tcp/4001");
        let mut tally = ReachabilityTally::new(2);

        tally.record_success(&a);
        tally.record_failure(&b);
        assert_eq!(tally.counts(&a), DialCounts { success: 1, failure: 0 });
        assert_eq!(tally.record_failure(&b), TallyVerdict::Rejected(b));
    }

    #[test]
    fn test_segment_filter_admits_once() {
        let mut filter = SegmentFilter::default();
        assert!(filter.admit(NetworkSegment::V4(8)));
        assert!(!filter.admit(NetworkSegment::V4(8)));
        assert!(filter.admit(NetworkSegment::V4(9)));
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::Timestamp;
use crate::ports::TimeSource;

/// Wall-clock seconds since the Unix epoch.
///
/// Stamps `time_received` on stored records and last-seen times in the
/// routing table. A clock set before 1970 reads as zero.
///
/// ```rust
/// use qc_01_peer_routing::{Record, SystemTimeSource, TimeSource};
///
/// let mut record = Record::new(b"/pk/abc".to_vec(), vec![1, 2, 3]);
/// record.time_received = Some(SystemTimeSource.now().as_secs());
/// assert!(record.time_received > Some(0));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Timestamp::new(secs)
    }
}

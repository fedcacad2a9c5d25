use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one inbound request: a process-local sequence number plus a
/// UUID derived from it, unique across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    pub seq: u64,
    pub uuid: uuid::Uuid,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> RequestId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestId {
            seq,
            uuid: uuid::Uuid::from_u128(self.seed ^ u128::from(seq)),
        }
    }
}

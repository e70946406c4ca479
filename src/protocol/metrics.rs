use std::sync::atomic::{AtomicU64, Ordering};

use super::Error;

/// Per-engine protocol counters, updated lock-free from the bus callback and
/// the main loop.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    messages_sent: AtomicU64,
    fragments_sent: AtomicU64,
    fragments_failed: AtomicU64,
    fragments_admitted: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_checksum: AtomicU64,
    dropped_buffer_full: AtomicU64,
    messages_received: AtomicU64,
    messages_requeued: AtomicU64,
    messages_expired: AtomicU64,
    messages_evicted: AtomicU64,
}

/// Which side of a fragment transmission is being counted.
#[derive(Clone, Copy)]
pub(crate) enum FragmentOutcome {
    Sent,
    Failed,
}

/// How a partial message left the reassembly path.
#[derive(Clone, Copy)]
pub(crate) enum PartialOutcome {
    Requeued,
    Expired,
    Evicted,
}

impl Stats {
    #[inline]
    pub(crate) fn record_fragment(&self, outcome: FragmentOutcome) {
        match outcome {
            FragmentOutcome::Sent => {
                self.fragments_sent.fetch_add(1, Ordering::Relaxed);
            }
            FragmentOutcome::Failed => {
                self.fragments_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub(crate) fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_admitted(&self) {
        self.fragments_admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ingest drop under the bucket matching its cause.
    #[inline]
    pub(crate) fn record_drop(&self, err: &Error) {
        let counter = match err {
            Error::ChecksumMismatch { .. } => &self.dropped_checksum,
            Error::BufferFull { .. } => &self.dropped_buffer_full,
            _ => &self.dropped_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_partial(&self, outcome: PartialOutcome) {
        let counter = match outcome {
            PartialOutcome::Requeued => &self.messages_requeued,
            PartialOutcome::Expired => &self.messages_expired,
            PartialOutcome::Evicted => &self.messages_evicted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            fragments_failed: self.fragments_failed.load(Ordering::Relaxed),
            fragments_admitted: self.fragments_admitted.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_checksum: self.dropped_checksum.load(Ordering::Relaxed),
            dropped_buffer_full: self.dropped_buffer_full.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_requeued: self.messages_requeued.load(Ordering::Relaxed),
            messages_expired: self.messages_expired.load(Ordering::Relaxed),
            messages_evicted: self.messages_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Lightweight snapshot of an engine's counters.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub fragments_sent: u64,
    pub fragments_failed: u64,
    pub fragments_admitted: u64,
    pub dropped_malformed: u64,
    pub dropped_checksum: u64,
    pub dropped_buffer_full: u64,
    pub messages_received: u64,
    pub messages_requeued: u64,
    pub messages_expired: u64,
    /// Partial messages dropped because the ring had no room to requeue them
    pub messages_evicted: u64,
}

impl StatsSnapshot {
    /// Fragments rejected at ingest for any reason.
    #[must_use]
    pub fn fragments_dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_checksum + self.dropped_buffer_full
    }
}

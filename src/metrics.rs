//! Decode and drop events, reported through an injected observer rather
//! than process-wide counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::ssh::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecodeEvent {
    BannerInvalid,
    UnexpectedMessage,
    MalformedKexInit,
    InvalidPacketLength,
    /// A range skipped because reassembly lost bytes before it.
    GapSkipped,
    QueueFull,
    ConnectionLimit,
    BufferOverflow,
}

impl DecodeEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeEvent::BannerInvalid => "banner_invalid",
            DecodeEvent::UnexpectedMessage => "unexpected_message",
            DecodeEvent::MalformedKexInit => "malformed_kexinit",
            DecodeEvent::InvalidPacketLength => "invalid_packet_length",
            DecodeEvent::GapSkipped => "gap_skipped",
            DecodeEvent::QueueFull => "queue_full",
            DecodeEvent::ConnectionLimit => "connection_limit",
            DecodeEvent::BufferOverflow => "buffer_overflow",
        }
    }
}

impl From<&DecodeError> for DecodeEvent {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::WrongMessageCode { .. } => DecodeEvent::UnexpectedMessage,
            DecodeError::InvalidLength { .. } => DecodeEvent::InvalidPacketLength,
            DecodeError::TooShort { .. } | DecodeError::Truncated { .. } => {
                DecodeEvent::MalformedKexInit
            }
        }
    }
}

pub trait DecodeObserver: Send + Sync {
    fn record(&self, event: DecodeEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DecodeObserver for NoopObserver {
    fn record(&self, _event: DecodeEvent) {}
}

/// Thread-safe event tally.
#[derive(Debug, Default)]
pub struct Counters {
    counts: Mutex<HashMap<DecodeEvent, u64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event: DecodeEvent) -> u64 {
        self.lock().get(&event).copied().unwrap_or(0)
    }

    /// Non-zero counts, in a stable order.
    pub fn snapshot(&self) -> Vec<(DecodeEvent, u64)> {
        let mut out: Vec<_> = self.lock().iter().map(|(&e, &n)| (e, n)).collect();
        out.sort_unstable();
        out
    }

    pub fn total(&self) -> u64 {
        self.lock().values().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DecodeEvent, u64>> {
        // A panicking writer cannot leave a half-updated counter behind.
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DecodeObserver for Counters {
    fn record(&self, event: DecodeEvent) {
        *self.lock().entry(event).or_insert(0) += 1;
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return write!(f, "no decode events");
        }
        for (i, (event, count)) in snapshot.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", event.as_str(), count)?;
        }
        Ok(())
    }
}

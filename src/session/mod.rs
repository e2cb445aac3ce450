//! Per-direction SSH preamble state machine.
//!
//! Each direction of a TCP connection gets one [`SessionState`]. The
//! reassembly layer hands it contiguous bytes; it answers how many it used
//! and whether the rest must be kept for the next delivery. Nothing is
//! buffered here.

pub mod fingerprint;
pub mod record;

use crate::ssh::{
    BannerDecode, BannerRecord, DecodeError, KexInitRecord, decode_banner, decode_kexinit,
    decode_packet_header,
};

pub use fingerprint::{Role, hassh, hassh_algorithms};
pub use record::{ConnectionIdentity, SessionRecord};

/// Upper bound on decode steps per delivery. A banner followed by a KEXINIT
/// needs two.
const MAX_FEED_STEPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    AwaitingBanner,
    /// The first line was not an SSH identification string.
    BannerInvalid,
    /// Banner seen (or skipped); waiting for KEXINIT.
    BannerComplete,
    KexInitComplete,
    /// A packet length made no sense; packet boundaries are lost.
    Desynchronized,
}

impl DirectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DirectionState::BannerInvalid
                | DirectionState::KexInitComplete
                | DirectionState::Desynchronized
        )
    }
}

/// Why a [`SessionState::feed`] call stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every byte was decoded.
    Exhausted,
    /// The bytes from `consumed` on are an incomplete banner or packet.
    NeedMoreData,
    BannerInvalid,
    /// Structural error. For a skipped packet, bytes after it are still
    /// worth keeping.
    Rejected(DecodeError),
    /// The direction wants no more data.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub consumed: usize,
    pub outcome: Outcome,
    pub banner_decoded: bool,
    pub kexinit_decoded: bool,
}

impl Progress {
    /// Offset into the delivered range from which the caller must keep
    /// bytes, given the range length. `None` means drop everything.
    pub fn retain_from(&self, len: usize) -> Option<usize> {
        match self.outcome {
            Outcome::NeedMoreData | Outcome::Rejected(_) if self.consumed < len => {
                Some(self.consumed)
            }
            _ => None,
        }
    }
}

enum Step {
    Banner(usize),
    Wait,
    BannerInvalid,
    KexInit(usize),
    /// A whole packet that is not a usable KEXINIT.
    Skipped(usize, DecodeError),
    Lost(DecodeError),
    Idle,
}

/// Decode progress and artifacts for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    state: DirectionState,
    banner: Option<BannerRecord>,
    kexinit: Option<KexInitRecord>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            state: DirectionState::AwaitingBanner,
            banner: None,
            kexinit: None,
        }
    }

    /// Start past the banner, for streams picked up after the version
    /// exchange.
    pub fn with_banner_skipped() -> Self {
        SessionState {
            state: DirectionState::BannerComplete,
            banner: None,
            kexinit: None,
        }
    }

    pub fn state(&self) -> DirectionState {
        self.state
    }

    pub fn banner(&self) -> Option<&BannerRecord> {
        self.banner.as_ref()
    }

    pub fn kexinit(&self) -> Option<&KexInitRecord> {
        self.kexinit.as_ref()
    }

    /// Decode as much of `data` as the current state allows.
    ///
    /// `data` must start where the previous call's retained bytes started
    /// (or at the beginning of the direction's stream).
    pub fn feed(&mut self, data: &[u8]) -> Progress {
        let mut progress = Progress {
            consumed: 0,
            outcome: Outcome::Exhausted,
            banner_decoded: false,
            kexinit_decoded: false,
        };

        for _ in 0..MAX_FEED_STEPS {
            let rest = &data[progress.consumed..];
            if rest.is_empty() {
                return progress;
            }

            match self.step(rest) {
                Step::Banner(n) => {
                    progress.consumed += n;
                    progress.banner_decoded = true;
                }
                Step::Wait => {
                    progress.outcome = Outcome::NeedMoreData;
                    return progress;
                }
                Step::BannerInvalid => {
                    progress.outcome = Outcome::BannerInvalid;
                    return progress;
                }
                Step::KexInit(n) => {
                    progress.consumed += n;
                    progress.kexinit_decoded = true;
                    progress.outcome = Outcome::Finished;
                    return progress;
                }
                Step::Skipped(n, err) => {
                    progress.consumed += n;
                    progress.outcome = Outcome::Rejected(err);
                    return progress;
                }
                Step::Lost(err) => {
                    progress.consumed = data.len();
                    progress.outcome = Outcome::Rejected(err);
                    return progress;
                }
                Step::Idle => {
                    progress.outcome = Outcome::Finished;
                    return progress;
                }
            }
        }

        if progress.consumed < data.len() {
            progress.outcome = Outcome::NeedMoreData;
        }
        progress
    }

    fn step(&mut self, data: &[u8]) -> Step {
        match self.state {
            DirectionState::AwaitingBanner => match decode_banner(data) {
                BannerDecode::Complete { record, consumed } => {
                    self.banner = Some(record);
                    self.state = DirectionState::BannerComplete;
                    Step::Banner(consumed)
                }
                BannerDecode::NeedMoreData => Step::Wait,
                BannerDecode::Invalid => {
                    self.state = DirectionState::BannerInvalid;
                    Step::BannerInvalid
                }
            },
            DirectionState::BannerComplete => self.step_kexinit(data),
            DirectionState::BannerInvalid
            | DirectionState::KexInitComplete
            | DirectionState::Desynchronized => Step::Idle,
        }
    }

    fn step_kexinit(&mut self, data: &[u8]) -> Step {
        let header = match decode_packet_header(data) {
            Ok(header) => header,
            Err(err) if err.is_transient() => return Step::Wait,
            Err(err) => {
                self.state = DirectionState::Desynchronized;
                return Step::Lost(err);
            }
        };
        if let Err(err) = header.validate() {
            self.state = DirectionState::Desynchronized;
            return Step::Lost(err);
        }

        let frame_len = header.frame_len();
        if data.len() < frame_len {
            return Step::Wait;
        }

        // Payload starts at the message code, right after padding_length.
        match decode_kexinit(&data[5..frame_len], header.padding_length) {
            Ok(record) => {
                self.kexinit = Some(record);
                self.state = DirectionState::KexInitComplete;
                Step::KexInit(frame_len)
            }
            Err(err) => Step::Skipped(frame_len, err),
        }
    }
}

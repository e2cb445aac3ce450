//! Glue between TCP reassembly and the per-direction state machines.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::config::{EmitPolicy, SessionConfig};
use crate::metrics::{DecodeEvent, DecodeObserver};
use crate::output::Emitter;
use crate::session::{ConnectionIdentity, Outcome, Progress, Role, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    ClientToServer,
    ServerToClient,
}

impl FlowDirection {
    /// The endpoint that sent bytes travelling in this direction.
    pub fn sender(self) -> Role {
        match self {
            FlowDirection::ClientToServer => Role::Client,
            FlowDirection::ServerToClient => Role::Server,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.client, self.server)
    }
}

/// Contiguous bytes from one direction, as delivered by reassembly.
#[derive(Debug, Clone, Copy)]
pub struct ByteRange<'a> {
    pub direction: FlowDirection,
    pub data: &'a [u8],
    pub timestamp: DateTime<Utc>,
    /// Bytes were lost before this range.
    pub gap: bool,
}

/// What reassembly must keep from the range it just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Nothing,
    /// Keep bytes from this offset on and prepend them to the next range.
    From(usize),
}

enum Emission {
    Pending(Box<SessionRecord>),
    Queued,
    Dropped,
}

/// Owns one connection's [`SessionRecord`] until it is emitted.
pub struct StreamAdapter {
    endpoints: Endpoints,
    config: SessionConfig,
    emission: Emission,
    emitter: Emitter,
    observer: Arc<dyn DecodeObserver>,
}

impl StreamAdapter {
    pub fn new(
        endpoints: Endpoints,
        config: SessionConfig,
        emitter: Emitter,
        observer: Arc<dyn DecodeObserver>,
    ) -> Self {
        StreamAdapter {
            endpoints,
            config,
            emission: Emission::Pending(Box::new(SessionRecord::new(config.skip_banner))),
            emitter,
            observer,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    /// The record, while it has not been handed off.
    pub fn record(&self) -> Option<&SessionRecord> {
        match &self.emission {
            Emission::Pending(record) => Some(&**record),
            Emission::Queued | Emission::Dropped => None,
        }
    }

    /// No further range can change anything.
    pub fn is_finished(&self) -> bool {
        self.record().is_none()
    }

    /// Whether bytes in `direction` can still be decoded.
    pub fn wants(&self, direction: FlowDirection) -> bool {
        self.record()
            .is_some_and(|r| !r.side(direction.sender()).state().is_terminal())
    }

    pub fn reassembled(&mut self, range: ByteRange<'_>) -> Retain {
        let Emission::Pending(record) = &mut self.emission else {
            return Retain::Nothing;
        };

        if range.direction == FlowDirection::ClientToServer {
            record.set_identity(ConnectionIdentity {
                client: self.endpoints.client,
                server: self.endpoints.server,
                timestamp: range.timestamp,
            });
        }

        if range.gap {
            debug!(
                "{}: {} bytes after a gap, not decoding",
                self.endpoints,
                range.data.len()
            );
            self.observer.record(DecodeEvent::GapSkipped);
            return Retain::Nothing;
        }
        if range.data.is_empty() {
            return Retain::Nothing;
        }

        let role = range.direction.sender();
        let progress = record.feed(role, range.data);
        self.report(role, &progress);

        if role == Role::Server && triggers_emit(self.config.emit_policy, &progress) {
            self.emit();
        }

        match progress.retain_from(range.data.len()) {
            Some(offset) => Retain::From(offset),
            None => Retain::Nothing,
        }
    }

    /// Connection torn down. Returns true if a record was queued just now.
    pub fn complete(mut self) -> bool {
        let emit_partial = self.config.emit_partial_on_close
            && self.record().is_some_and(SessionRecord::has_artifacts);
        if emit_partial {
            debug!("{}: emitting partial session on close", self.endpoints);
            return self.emit();
        }
        if !self.is_finished() {
            debug!("{}: closed before emission", self.endpoints);
        }
        false
    }

    fn emit(&mut self) -> bool {
        let Emission::Pending(record) = std::mem::replace(&mut self.emission, Emission::Queued)
        else {
            return false;
        };
        let queued = self.emitter.try_emit(*record);
        if !queued {
            self.emission = Emission::Dropped;
        }
        queued
    }

    fn report(&self, role: Role, progress: &Progress) {
        let Some(record) = self.record() else {
            return;
        };
        let side = record.side(role);

        if progress.banner_decoded
            && let Some(banner) = side.banner()
        {
            debug!("{}: {} banner {:?}", self.endpoints, role, banner.text());
        }
        if progress.kexinit_decoded {
            debug!(
                "{}: {} kexinit, hassh {}",
                self.endpoints,
                role,
                record.fingerprint(role).unwrap_or_default()
            );
        }

        match &progress.outcome {
            Outcome::BannerInvalid => {
                debug!("{}: {} sent a non-SSH banner", self.endpoints, role);
                self.observer.record(DecodeEvent::BannerInvalid);
            }
            Outcome::Rejected(err) => {
                debug!("{}: {} packet rejected: {}", self.endpoints, role, err);
                self.observer.record(DecodeEvent::from(err));
            }
            Outcome::Exhausted | Outcome::NeedMoreData | Outcome::Finished => {}
        }
    }
}

fn triggers_emit(policy: EmitPolicy, progress: &Progress) -> bool {
    match policy {
        EmitPolicy::ServerBanner => progress.banner_decoded || progress.kexinit_decoded,
        EmitPolicy::ServerKexInit => progress.kexinit_decoded,
    }
}

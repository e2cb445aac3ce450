//! Runtime knobs shared by the library layers. The binary fills these in
//! from its command line; tests build them directly.

use chrono::TimeDelta;

use crate::ssh::{MAX_BANNER_LEN, MAX_PACKET_LEN};

/// When a connection's record leaves for the output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitPolicy {
    /// As soon as the server's first artifact is decoded: its banner, or its
    /// KEXINIT when banners are skipped.
    #[default]
    ServerBanner,
    /// Only once the server's KEXINIT is decoded.
    ServerKexInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub emit_policy: EmitPolicy,
    /// Start both directions past the banner phase.
    pub skip_banner: bool,
    /// On teardown, emit records that never met the policy if at least one
    /// banner was captured.
    pub emit_partial_on_close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyConfig {
    pub max_connections: usize,
    /// Per-direction cap on bytes held for the decoder. The default fits a
    /// banner plus the largest packet the decoder accepts.
    pub max_buffered_bytes: usize,
    /// Per-direction cap on segments held ahead of a hole.
    pub max_out_of_order: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig {
            max_connections: 10_000,
            max_buffered_bytes: MAX_BANNER_LEN + MAX_PACKET_LEN as usize,
            max_out_of_order: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub session: SessionConfig,
    pub reassembly: ReassemblyConfig,
    pub queue_capacity: usize,
    /// Connections idle for longer than this are completed.
    pub close_timeout: TimeDelta,
    /// Idle sweep and statistics interval, in packets. Zero disables both.
    pub stats_every: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session: SessionConfig::default(),
            reassembly: ReassemblyConfig::default(),
            queue_capacity: 4096,
            close_timeout: TimeDelta::seconds(30),
            stats_every: 10_000,
        }
    }
}

//! SSH transport preamble decoding (RFC 4253 sections 4.2, 6 and 7.1).
//!
//! Everything in here is a pure function over a byte slice: no buffering, no
//! connection state. The caller decides what to do with "not enough data
//! yet" versus a structural error.

pub mod banner;
pub mod kexinit;
pub mod packet;

use thiserror::Error;

pub use banner::{BannerDecode, BannerRecord, decode_banner};
pub use kexinit::{KexInitRecord, decode_kexinit};
pub use packet::{MessageCode, PacketHeader, decode_packet_header};

/// Required prefix of every identification string.
pub const BANNER_PREFIX: &[u8] = b"SSH-";

/// Maximum identification string length, CR LF included.
pub const MAX_BANNER_LEN: usize = 255;

/// Size of the fixed binary packet header: length, padding length, message code.
pub const PACKET_HEADER_LEN: usize = 6;

/// Largest `packet_length` accepted. OpenSSH refuses anything above this too.
pub const MAX_PACKET_LEN: u32 = 256 * 1024;

/// Errors produced while decoding binary packets.
///
/// `TooShort` and a short total length are transient from the caller's point
/// of view; everything else is structural.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet header needs {} bytes, {available} available", PACKET_HEADER_LEN)]
    TooShort { available: usize },

    #[error("{field} needs {needed} bytes, {available} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unexpected message {found}, expected {}", MessageCode::KexInit)]
    WrongMessageCode { found: MessageCode },

    #[error("packet length {packet_length} invalid for padding length {padding_length}")]
    InvalidLength {
        packet_length: u32,
        padding_length: u8,
    },
}

impl DecodeError {
    /// True for errors that more bytes could resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, DecodeError::TooShort { .. })
    }
}

use std::fmt;

use super::{DecodeError, MAX_PACKET_LEN, PACKET_HEADER_LEN};

/// Message numbers the preamble decoder knows about (RFC 4253 section 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    KexInit,
    NewKeys,
    KexDhInit,
    KexDhReply,
    Unrecognized(u8),
}

impl MessageCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            20 => MessageCode::KexInit,
            21 => MessageCode::NewKeys,
            30 => MessageCode::KexDhInit,
            31 => MessageCode::KexDhReply,
            other => MessageCode::Unrecognized(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MessageCode::KexInit => 20,
            MessageCode::NewKeys => 21,
            MessageCode::KexDhInit => 30,
            MessageCode::KexDhReply => 31,
            MessageCode::Unrecognized(code) => code,
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCode::KexInit => write!(f, "KEXINIT (20)"),
            MessageCode::NewKeys => write!(f, "NEWKEYS (21)"),
            MessageCode::KexDhInit => write!(f, "KEXDH_INIT (30)"),
            MessageCode::KexDhReply => write!(f, "KEXDH_REPLY (31)"),
            MessageCode::Unrecognized(code) => write!(f, "unrecognized ({})", code),
        }
    }
}

/// Binary packet header:
///
/// ```text
/// uint32   packet_length    (everything after this field, MAC excluded)
/// byte     padding_length
/// byte     message code     (first payload byte)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_length: u32,
    pub padding_length: u8,
    pub message_code: MessageCode,
}

impl PacketHeader {
    /// Bytes the whole packet occupies on the wire: the 6 header bytes plus
    /// `packet_length` minus the two header fields it already covers.
    pub fn frame_len(&self) -> usize {
        PACKET_HEADER_LEN + self.packet_length as usize - 2
    }

    /// Reject lengths no amount of further data can make decodable.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let min = u32::from(self.padding_length) + 2;
        if self.packet_length < min || self.packet_length > MAX_PACKET_LEN {
            return Err(DecodeError::InvalidLength {
                packet_length: self.packet_length,
                padding_length: self.padding_length,
            });
        }
        Ok(())
    }
}

/// Extract the fixed header fields from the start of `data`.
pub fn decode_packet_header(data: &[u8]) -> Result<PacketHeader, DecodeError> {
    let Some(header) = data.get(..PACKET_HEADER_LEN) else {
        return Err(DecodeError::TooShort {
            available: data.len(),
        });
    };
    Ok(PacketHeader {
        packet_length: u32::from_be_bytes([header[0], header[1], header[2], header[3]]),
        padding_length: header[4],
        message_code: MessageCode::from_u8(header[5]),
    })
}

/// Wrap `payload` (message code first) in an unencrypted binary packet,
/// padded so the frame is a multiple of `block_size` (at least 8).
pub fn encode_packet(payload: &[u8], block_size: usize) -> Vec<u8> {
    let block = block_size.max(8);
    let unpadded = 4 + 1 + payload.len();
    let mut padding = block - unpadded % block;
    if padding < 4 {
        padding += block;
    }

    let packet_length = (1 + payload.len() + padding) as u32;
    let mut out = Vec::with_capacity(4 + packet_length as usize);
    out.extend_from_slice(&packet_length.to_be_bytes());
    out.push(padding as u8);
    out.extend_from_slice(payload);
    out.resize(out.len() + padding, 0);
    out
}

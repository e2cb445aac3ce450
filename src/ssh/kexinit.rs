use super::DecodeError;
use super::packet::{MessageCode, encode_packet};

/// Decoded SSH_MSG_KEXINIT (RFC 4253 section 7.1).
///
/// Name-lists are kept as the raw comma-separated text seen on the wire;
/// fingerprints are computed over that text, not over a re-joined list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInitRecord {
    pub cookie: [u8; 16],
    pub kex_algorithms: String,
    pub server_host_key_algorithms: String,
    pub encryption_algorithms_client_to_server: String,
    pub encryption_algorithms_server_to_client: String,
    pub mac_algorithms_client_to_server: String,
    pub mac_algorithms_server_to_client: String,
    pub compression_algorithms_client_to_server: String,
    pub compression_algorithms_server_to_client: String,
    pub languages_client_to_server: String,
    pub languages_server_to_client: String,
    pub first_kex_packet_follows: bool,
    pub reserved: u32,
}

impl KexInitRecord {
    /// The ten name-lists in wire order.
    pub fn name_lists(&self) -> [&str; 10] {
        [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_algorithms_client_to_server,
            &self.encryption_algorithms_server_to_client,
            &self.mac_algorithms_client_to_server,
            &self.mac_algorithms_server_to_client,
            &self.compression_algorithms_client_to_server,
            &self.compression_algorithms_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ]
    }

    /// Serialize as a KEXINIT payload, message code first.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.push(MessageCode::KexInit.to_u8());
        buf.extend_from_slice(&self.cookie);
        for list in self.name_lists() {
            buf.extend_from_slice(&(list.len() as u32).to_be_bytes());
            buf.extend_from_slice(list.as_bytes());
        }
        buf.push(u8::from(self.first_kex_packet_follows));
        buf.extend_from_slice(&self.reserved.to_be_bytes());
        buf
    }

    /// Serialize as a complete unencrypted binary packet.
    pub fn to_packet(&self, block_size: usize) -> Vec<u8> {
        encode_packet(&self.to_payload(), block_size)
    }
}

/// Decode a KEXINIT from a packet payload.
///
/// `payload` starts at the message code byte and still carries the
/// `padding_length` padding bytes at its end.
pub fn decode_kexinit(payload: &[u8], padding_length: u8) -> Result<KexInitRecord, DecodeError> {
    let Some(&code) = payload.first() else {
        return Err(DecodeError::Truncated {
            field: "message code",
            needed: 1,
            available: 0,
        });
    };
    let code = MessageCode::from_u8(code);
    if code != MessageCode::KexInit {
        return Err(DecodeError::WrongMessageCode { found: code });
    }

    let padding = usize::from(padding_length);
    if padding >= payload.len() {
        return Err(DecodeError::Truncated {
            field: "padding",
            needed: padding + 1,
            available: payload.len(),
        });
    }

    let mut r = Reader::new(&payload[1..payload.len() - padding]);
    let cookie = r.take(16, "cookie")?;
    let mut cookie_bytes = [0u8; 16];
    cookie_bytes.copy_from_slice(cookie);

    Ok(KexInitRecord {
        cookie: cookie_bytes,
        kex_algorithms: r.name_list("kex_algorithms")?,
        server_host_key_algorithms: r.name_list("server_host_key_algorithms")?,
        encryption_algorithms_client_to_server: r
            .name_list("encryption_algorithms_client_to_server")?,
        encryption_algorithms_server_to_client: r
            .name_list("encryption_algorithms_server_to_client")?,
        mac_algorithms_client_to_server: r.name_list("mac_algorithms_client_to_server")?,
        mac_algorithms_server_to_client: r.name_list("mac_algorithms_server_to_client")?,
        compression_algorithms_client_to_server: r
            .name_list("compression_algorithms_client_to_server")?,
        compression_algorithms_server_to_client: r
            .name_list("compression_algorithms_server_to_client")?,
        languages_client_to_server: r.name_list("languages_client_to_server")?,
        languages_server_to_client: r.name_list("languages_server_to_client")?,
        first_kex_packet_follows: r.take(1, "first_kex_packet_follows")?[0] != 0,
        reserved: r.u32("reserved")?,
    })
}

/// Bounds-checked cursor. Every read reports the field it was after.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated {
                field,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name_list(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.u32(field)? as usize;
        let raw = self.take(len, field)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ssh::packet::decode_packet_header;

    pub(crate) fn openssh_client_kexinit() -> KexInitRecord {
        KexInitRecord {
            cookie: *b"0123456789abcdef",
            kex_algorithms: "curve25519-sha256,curve25519-sha256@libssh.org,ext-info-c".into(),
            server_host_key_algorithms: "ssh-ed25519,rsa-sha2-512,rsa-sha2-256".into(),
            encryption_algorithms_client_to_server:
                "chacha20-poly1305@openssh.com,aes128-ctr,aes256-gcm@openssh.com".into(),
            encryption_algorithms_server_to_client:
                "chacha20-poly1305@openssh.com,aes128-ctr,aes256-gcm@openssh.com".into(),
            mac_algorithms_client_to_server: "umac-64-etm@openssh.com,hmac-sha2-256".into(),
            mac_algorithms_server_to_client: "umac-64-etm@openssh.com,hmac-sha2-256".into(),
            compression_algorithms_client_to_server: "none,zlib@openssh.com".into(),
            compression_algorithms_server_to_client: "none,zlib@openssh.com".into(),
            languages_client_to_server: String::new(),
            languages_server_to_client: String::new(),
            first_kex_packet_follows: false,
            reserved: 0,
        }
    }

    /// Split an encoded packet the way the session pipeline does.
    fn payload_of(packet: &[u8]) -> (&[u8], u8) {
        let header = decode_packet_header(packet).unwrap();
        (&packet[5..header.frame_len()], header.padding_length)
    }

    #[test]
    fn packet_round_trip_matches_byte_for_byte() {
        let original = openssh_client_kexinit();
        let packet = original.to_packet(8);
        let (payload, padding) = payload_of(&packet);

        let decoded = decode_kexinit(payload, padding).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.cookie, *b"0123456789abcdef");
        for (got, want) in decoded.name_lists().iter().zip(original.name_lists()) {
            assert_eq!(got.as_bytes(), want.as_bytes());
        }
    }

    #[test]
    fn first_kex_packet_follows_and_reserved_survive() {
        let mut original = openssh_client_kexinit();
        original.first_kex_packet_follows = true;
        original.reserved = 0xdead_beef;
        let packet = original.to_packet(16);
        let (payload, padding) = payload_of(&packet);
        let decoded = decode_kexinit(payload, padding).unwrap();
        assert!(decoded.first_kex_packet_follows);
        assert_eq!(decoded.reserved, 0xdead_beef);
    }

    #[test]
    fn wrong_message_code() {
        let mut payload = openssh_client_kexinit().to_payload();
        payload[0] = 21;
        assert_eq!(
            decode_kexinit(&payload, 0),
            Err(DecodeError::WrongMessageCode {
                found: MessageCode::NewKeys
            })
        );
    }

    #[test]
    fn empty_payload_is_truncated() {
        assert!(matches!(
            decode_kexinit(&[], 0),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn padding_longer_than_payload() {
        let payload = openssh_client_kexinit().to_payload();
        assert!(matches!(
            decode_kexinit(&payload[..4], 200),
            Err(DecodeError::Truncated { field: "padding", .. })
        ));
    }

    #[test]
    fn name_list_length_past_end() {
        let mut payload = vec![20];
        payload.extend_from_slice(&[0xaa; 16]);
        payload.extend_from_slice(&u32::MAX.to_be_bytes());
        payload.extend_from_slice(b"curve25519-sha256");
        assert_eq!(
            decode_kexinit(&payload, 0),
            Err(DecodeError::Truncated {
                field: "kex_algorithms",
                needed: u32::MAX as usize,
                available: 17,
            })
        );
    }

    #[test]
    fn missing_reserved_field() {
        let mut payload = openssh_client_kexinit().to_payload();
        payload.truncate(payload.len() - 2);
        assert!(matches!(
            decode_kexinit(&payload, 0),
            Err(DecodeError::Truncated { field: "reserved", .. })
        ));
    }

    #[test]
    fn cookie_cut_short() {
        let payload = [20u8, 1, 2, 3];
        assert_eq!(
            decode_kexinit(&payload, 0),
            Err(DecodeError::Truncated {
                field: "cookie",
                needed: 16,
                available: 3,
            })
        );
    }

    #[test]
    fn padding_bytes_are_not_parsed() {
        // Padding that looks like an extra name-list must be ignored.
        let mut payload = openssh_client_kexinit().to_payload();
        payload.extend_from_slice(&[0xff; 7]);
        let decoded = decode_kexinit(&payload, 7).unwrap();
        assert_eq!(decoded, openssh_client_kexinit());
    }
}

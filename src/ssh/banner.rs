use super::{BANNER_PREFIX, MAX_BANNER_LEN};

/// Identification line sent by one endpoint, e.g. `SSH-2.0-OpenSSH_9.6 Ubuntu`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerRecord {
    text: String,
    consumed: usize,
}

/// Result of a banner decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BannerDecode {
    Complete { record: BannerRecord, consumed: usize },
    /// No line terminator yet. Nothing was consumed.
    NeedMoreData,
    /// Not an SSH identification line. Do not retry on this direction.
    Invalid,
}

impl BannerRecord {
    /// Banner text without the line terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes taken from the stream, terminator included.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Protocol version, e.g. `2.0` or `1.99`.
    pub fn proto_version(&self) -> Option<&str> {
        let rest = self.text.strip_prefix("SSH-")?;
        rest.split_once('-').map(|(proto, _)| proto)
    }

    /// Software version, e.g. `OpenSSH_8.9p1`.
    pub fn software(&self) -> Option<&str> {
        let (_, rest) = self.text.strip_prefix("SSH-")?.split_once('-')?;
        Some(rest.split_once(' ').map_or(rest, |(software, _)| software))
    }

    pub fn comments(&self) -> Option<&str> {
        let (_, rest) = self.text.strip_prefix("SSH-")?.split_once('-')?;
        rest.split_once(' ')
            .map(|(_, comments)| comments.trim())
            .filter(|c| !c.is_empty())
    }
}

/// Decode the identification line at the start of `data`.
///
/// Accepts CR LF and bare LF. Rejects early once the bytes seen so far cannot
/// be an `SSH-` line, so a non-SSH stream never waits for a newline.
pub fn decode_banner(data: &[u8]) -> BannerDecode {
    let prefix_len = data.len().min(BANNER_PREFIX.len());
    if data[..prefix_len] != BANNER_PREFIX[..prefix_len] {
        return BannerDecode::Invalid;
    }

    let window = &data[..data.len().min(MAX_BANNER_LEN)];
    let Some(newline) = window.iter().position(|&b| b == b'\n') else {
        return if data.len() >= MAX_BANNER_LEN {
            BannerDecode::Invalid
        } else {
            BannerDecode::NeedMoreData
        };
    };

    let line = &data[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.contains(&0) {
        return BannerDecode::Invalid;
    }

    let consumed = newline + 1;
    BannerDecode::Complete {
        record: BannerRecord {
            text: String::from_utf8_lossy(line).into_owned(),
            consumed,
        },
        consumed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(data: &[u8]) -> (BannerRecord, usize) {
        match decode_banner(data) {
            BannerDecode::Complete { record, consumed } => (record, consumed),
            other => panic!("expected a banner, got {:?}", other),
        }
    }

    #[test]
    fn bare_lf_banner() {
        let (record, consumed) = complete(b"SSH-2.0-OpenSSH_8.9\n");
        assert_eq!(record.text(), "SSH-2.0-OpenSSH_8.9");
        assert_eq!(consumed, 20);
        assert_eq!(record.consumed(), 20);
    }

    #[test]
    fn crlf_banner_counts_both_terminator_bytes() {
        let (record, consumed) = complete(b"SSH-2.0-PuTTY_Release_0.78\r\n");
        assert_eq!(record.text(), "SSH-2.0-PuTTY_Release_0.78");
        assert_eq!(consumed, 28);
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let (_, consumed) = complete(b"SSH-2.0-x\r\n\x00\x00\x01\x0c");
        assert_eq!(consumed, 11);
    }

    #[test]
    fn unterminated_prefix_needs_more_data() {
        let full = b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13";
        for end in 0..=full.len() {
            assert_eq!(
                decode_banner(&full[..end]),
                BannerDecode::NeedMoreData,
                "prefix of length {}",
                end
            );
        }
    }

    #[test]
    fn non_ssh_input_is_invalid() {
        assert_eq!(decode_banner(b"GET / HTTP/1.1\r\n"), BannerDecode::Invalid);
        assert_eq!(decode_banner(b"\x16\x03\x01"), BannerDecode::Invalid);
        assert_eq!(decode_banner(b"S"), BannerDecode::NeedMoreData);
        assert_eq!(decode_banner(b"SX"), BannerDecode::Invalid);
        assert_eq!(decode_banner(b"ssh-2.0-lower\n"), BannerDecode::Invalid);
    }

    #[test]
    fn terminator_inside_prefix_is_invalid() {
        assert_eq!(decode_banner(b"SSH\n"), BannerDecode::Invalid);
    }

    #[test]
    fn overlong_line_is_invalid() {
        let mut data = b"SSH-2.0-".to_vec();
        data.resize(MAX_BANNER_LEN, b'A');
        assert_eq!(decode_banner(&data), BannerDecode::Invalid);

        // One byte short of the limit still waits.
        data.truncate(MAX_BANNER_LEN - 1);
        assert_eq!(decode_banner(&data), BannerDecode::NeedMoreData);
    }

    #[test]
    fn nul_byte_is_invalid() {
        assert_eq!(decode_banner(b"SSH-2.0-evil\x00\r\n"), BannerDecode::Invalid);
    }

    #[test]
    fn version_parts() {
        let (record, _) = complete(b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n");
        assert_eq!(record.proto_version(), Some("2.0"));
        assert_eq!(record.software(), Some("OpenSSH_9.6p1"));
        assert_eq!(record.comments(), Some("Ubuntu-3ubuntu13"));

        let (record, _) = complete(b"SSH-1.99-Cisco-1.25\n");
        assert_eq!(record.proto_version(), Some("1.99"));
        assert_eq!(record.software(), Some("Cisco-1.25"));
        assert_eq!(record.comments(), None);
    }

    #[test]
    fn non_utf8_banner_is_lossy() {
        let (record, _) = complete(b"SSH-2.0-\xff\xfe\n");
        assert!(record.text().starts_with("SSH-2.0-"));
        assert!(record.text().contains('\u{FFFD}'));
    }
}

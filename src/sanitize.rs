use std::borrow::Cow;
use std::fmt::Write;

/// Make peer-supplied text safe to print on a terminal.
///
/// Banners and algorithm names come straight off the wire. C0 controls, DEL
/// and C1 controls (some terminals treat U+009B as CSI) are written as
/// `\xNN` / `\u{NNNN}` escapes so the bytes stay visible without being
/// interpreted. Text without such characters is returned unchanged.
pub fn escape_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_dangerous) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        if !is_dangerous(c) {
            out.push(c);
        } else if c.is_ascii() {
            let _ = write!(out, "\\x{:02x}", c as u32);
        } else {
            let _ = write!(out, "\\u{{{:04x}}}", c as u32);
        }
    }
    Cow::Owned(out)
}

fn is_dangerous(c: char) -> bool {
    matches!(c, '\x00'..='\x1F' | '\x7F' | '\u{0080}'..='\u{009F}')
}

//! Keeps off-air text single-line in logs.
//!
//! Callsigns and chat lines come straight from remote terminals and may carry CRs,
//! BELs or stray escape bytes. Everything logged from a station goes through
//! [`escape_log`]; raw AGWPE payloads go through [`hex_preview`].

use std::fmt::Write;

/// Characters kept from a single logged value.
const MAX_PREVIEW: usize = 300;

/// Escape `s` for a single log line and cap it at `MAX_PREVIEW` characters.
///
/// CR, LF, tab and backslash use their Rust escapes; any other control character is
/// shown as `<XX>` in hex, the way packet monitors print non-printables. Latin-1
/// letters pass through unchanged.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(MAX_PREVIEW) {
        match ch {
            '\r' | '\n' | '\t' | '\\' => out.extend(ch.escape_default()),
            c if c.is_control() => {
                let _ = write!(out, "<{:02X}>", c as u32);
            }
            c => out.push(c),
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

/// First `max` bytes as space-separated hex, with a count of what was left out.
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    let shown = &bytes[..bytes.len().min(max)];
    let mut out = shown
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > max {
        let _ = write!(out, " …(+{})", bytes.len() - max);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{escape_log, hex_preview};

    #[test]
    fn terminal_controls_are_visible() {
        let esc = escape_log("K6TU\r\nhi\tthere\u{7}\u{1b}");
        assert_eq!(esc, "K6TU\\r\\nhi\\tthere<07><1B>");
    }

    #[test]
    fn latin1_text_is_untouched() {
        assert_eq!(escape_log("caf\u{e9} \\o/"), "caf\u{e9} \\\\o/");
    }

    #[test]
    fn long_input_is_truncated() {
        let esc = escape_log(&"x".repeat(400));
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), 301);
        assert!(!escape_log(&"x".repeat(300)).ends_with('…'));
    }

    #[test]
    fn hex_preview_caps_output() {
        assert_eq!(hex_preview(&[0x52, 0x00, 0xF0], 8), "52 00 F0");
        assert_eq!(hex_preview(&[1, 2, 3, 4], 2), "01 02 …(+2)");
        assert_eq!(hex_preview(&[], 4), "");
    }
}

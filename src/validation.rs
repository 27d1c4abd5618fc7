//! Callsign validation for the BBS station identity and the config wizard.

/// Callsign validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallsignError {
    #[error("Callsign is empty")]
    Empty,

    #[error("Callsign prefix must be 1-2 letters followed by a single digit")]
    InvalidPrefix,

    #[error("Callsign suffix must be 1-4 letters after the digit")]
    InvalidSuffix,

    #[error("SSID must be a number from 0 to 15 (got '{ssid}')")]
    InvalidSsid { ssid: String },

    #[error("Callsign contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Callsign '{base}' is longer than the {max} characters an AX.25 address holds")]
    TooLong { base: String, max: usize },
}

/// Highest SSID an AX.25 address can carry (4 bits).
pub const MAX_SSID: u8 = 15;

/// Characters in the address field of an AX.25 frame, SSID excluded.
pub const MAX_BASE_LEN: usize = 6;

/// Validate an amateur radio callsign with optional SSID and return it uppercased.
///
/// Accepted shape: 1-2 letters, one digit, 1-4 letters, at most six characters in
/// all, optionally `-N` where N is one or two digits in `0..=15`. Examples: `W1ABC`,
/// `W2ASM-10`, `K6TU-5`.
pub fn validate_callsign(callsign: &str) -> Result<String, CallsignError> {
    let upper = callsign.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(CallsignError::Empty);
    }

    let invalid: String = upper
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        .collect();
    if !invalid.is_empty() {
        return Err(CallsignError::InvalidCharacters { chars: invalid });
    }

    let (base, ssid) = match upper.split_once('-') {
        Some((base, ssid)) => (base, Some(ssid)),
        None => (upper.as_str(), None),
    };

    let bytes = base.as_bytes();
    let prefix_len = bytes.iter().take_while(|b| b.is_ascii_alphabetic()).count();
    if !(1..=2).contains(&prefix_len) {
        return Err(CallsignError::InvalidPrefix);
    }
    match bytes.get(prefix_len) {
        Some(b) if b.is_ascii_digit() => {}
        _ => return Err(CallsignError::InvalidPrefix),
    }
    let suffix = &bytes[prefix_len + 1..];
    if !(1..=4).contains(&suffix.len()) || !suffix.iter().all(|b| b.is_ascii_alphabetic()) {
        return Err(CallsignError::InvalidSuffix);
    }
    if base.len() > MAX_BASE_LEN {
        return Err(CallsignError::TooLong {
            base: base.to_string(),
            max: MAX_BASE_LEN,
        });
    }

    if let Some(ssid) = ssid {
        let in_range = !ssid.is_empty()
            && ssid.len() <= 2
            && ssid.bytes().all(|b| b.is_ascii_digit())
            && ssid.parse::<u8>().map(|n| n <= MAX_SSID).unwrap_or(false);
        if !in_range {
            return Err(CallsignError::InvalidSsid {
                ssid: ssid.to_string(),
            });
        }
    }

    Ok(upper)
}

/// Strip the `-SSID` part of a callsign (`W1ABC-10` -> `W1ABC`).
pub fn base_callsign(callsign: &str) -> &str {
    callsign.split('-').next().unwrap_or(callsign)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_callsigns() {
        for call in ["W1ABC", "W2ASM-10", "K6TU-5", "n0call-1", "VE3XYZ", "G4ABCD-0"] {
            assert!(validate_callsign(call).is_ok(), "{call} should be valid");
        }
        assert_eq!(validate_callsign(" k6tu-5 ").unwrap(), "K6TU-5");
    }

    #[test]
    fn rejects_malformed_callsigns() {
        assert_eq!(validate_callsign(""), Err(CallsignError::Empty));
        assert_eq!(validate_callsign("1ABC"), Err(CallsignError::InvalidPrefix));
        assert_eq!(validate_callsign("ABC1D"), Err(CallsignError::InvalidPrefix));
        assert_eq!(validate_callsign("W1"), Err(CallsignError::InvalidSuffix));
        assert_eq!(validate_callsign("W1ABCDE"), Err(CallsignError::InvalidSuffix));
        assert_eq!(validate_callsign("W1A2"), Err(CallsignError::InvalidSuffix));
        assert!(matches!(
            validate_callsign("W1ABC-16"),
            Err(CallsignError::InvalidSsid { .. })
        ));
        assert!(matches!(
            validate_callsign("W1ABC-"),
            Err(CallsignError::InvalidSsid { .. })
        ));
        assert!(matches!(
            validate_callsign("W1 ABC"),
            Err(CallsignError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn seven_character_base_does_not_fit_an_address() {
        assert!(matches!(
            validate_callsign("AB1CDEF-10"),
            Err(CallsignError::TooLong { .. })
        ));
        assert!(matches!(
            validate_callsign("AB1CDEF"),
            Err(CallsignError::TooLong { .. })
        ));
        // Longest accepted form still encodes into the 10-byte call field
        let longest = validate_callsign("AB1CDE-15").unwrap();
        assert!(crate::agwpe::frame::AgwpeFrame::register(&longest)
            .encode()
            .is_ok());
    }

    #[test]
    fn base_callsign_drops_ssid() {
        assert_eq!(base_callsign("W2ASM-10"), "W2ASM");
        assert_eq!(base_callsign("K6TU"), "K6TU");
    }
}

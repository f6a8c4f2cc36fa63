// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Maximum byte length of a length-prefixed UTF-8 string.
pub const MAX_STRING_LEN: usize = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of string exceeds 65535 bytes.
    TooLong,

    /// String contains a disallowed code point.
    InvalidChar,

    /// Byte sequence is not well-formed UTF-8.
    InvalidUtf8,
}

/// Check rules of UTF-8 encoded strings in MQTT packets.
///
/// The character data in a UTF-8 Encoded String MUST be well-formed UTF-8
/// as defined by the Unicode specification and restated in RFC 3629.
/// In particular, the character data MUST NOT include encodings of code points
/// between U+D800 and U+DFFF [MQTT-1.5.4-1].
///
/// A UTF-8 Encoded String MUST NOT include an encoding of the null character
/// U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if `s` is too long or contains null characters.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > MAX_STRING_LEN {
        return Err(StringError::TooLong);
    }
    // Surrogate pairs cannot occur in a rust string, only the null
    // character needs an explicit check.
    if s.chars().any(|c| c == '\u{0000}') {
        return Err(StringError::InvalidChar);
    }
    Ok(())
}

/// Convert byte slice into an owned string, checking MQTT string rules.
///
/// # Errors
///
/// Returns error if `bytes` is not a valid UTF-8 string.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| StringError::InvalidUtf8)?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Generate a random alphanumeric string with `len` characters.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Check rules of client identifiers.
///
/// The Server MUST allow ClientIds which are between 1 and 23 UTF-8 encoded
/// bytes in length, and that contain only the characters
/// "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ"
/// [MQTT-3.1.3-5]. The Server MAY allow more than that, so only obviously
/// broken identifiers are rejected here.
///
/// # Errors
///
/// Returns error if `client_id` is an invalid string.
pub fn validate_client_id(client_id: &str) -> Result<(), StringError> {
    validate_utf8_string(client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("hello").is_ok());
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("with\u{0000}null").is_err());
    }

    #[test]
    fn test_random_string() {
        let s = random_string(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

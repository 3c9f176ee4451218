//! Source key decoding
//!
//! Keys delivered in S3 event notifications are query-escaped: reserved
//! characters arrive as `%XX` and spaces as `+`. The store must be addressed
//! with the decoded key.

use super::{TransferError, TransferResult};
use percent_encoding::percent_decode_str;

/// Decode a query-escaped object key
///
/// `%XX` becomes the byte `0xXX` and `+` becomes a space. The decoded bytes
/// must be valid UTF-8.
///
/// # Errors
///
/// Returns `TransferError::Decode` for a `%` not followed by two hex digits,
/// or when the decoded key is not UTF-8.
///
/// # Example
///
/// ```
/// use orbit_relay::transfer::decode_source_key;
///
/// assert_eq!(decode_source_key("user%40example.com/report+1.csv").unwrap(),
///            "user@example.com/report 1.csv");
/// assert!(decode_source_key("bad%4").is_err());
/// ```
pub fn decode_source_key(key: &str) -> TransferResult<String> {
    // percent_decode passes malformed escapes through untouched
    if let Some(offset) = malformed_escape(key) {
        let escape: String = key[offset..].chars().take(3).collect();
        return Err(TransferError::Decode {
            key: key.to_string(),
            reason: format!("invalid escape '{}' at byte {}", escape, offset),
        });
    }

    let spaced = key.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| TransferError::Decode {
            key: key.to_string(),
            reason: "decoded key is not valid UTF-8".to_string(),
        })
}

/// Byte offset of the first `%` not followed by two hex digits
fn malformed_escape(key: &str) -> Option<usize> {
    let bytes = key.as_bytes();
    bytes.iter().enumerate().find_map(|(i, &b)| {
        let valid = b != b'%'
            || matches!(bytes.get(i + 1..i + 3), Some(hex) if hex.iter().all(u8::is_ascii_hexdigit));
        (!valid).then_some(i)
    })
}

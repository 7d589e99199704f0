//! Fixed16 response framing and Livestatus status codes.

use crate::error::LivestatusError;

/// Size of the fixed16 response preamble in bytes.
pub const FIXED16_HEADER_LEN: usize = 16;

/// Common Livestatus status codes returned in the fixed16 header.
/// Not exhaustive, just the most commonly observed ones.
pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Returns a short text for the given status code, "Unknown" otherwise.
pub fn status_text(code: u16) -> &'static str {
    match code {
        STATUS_OK => "OK",
        STATUS_BAD_REQUEST => "Bad Request",
        STATUS_UNAUTHORIZED => "Unauthorized",
        STATUS_FORBIDDEN => "Forbidden",
        STATUS_NOT_FOUND => "Not Found",
        STATUS_INTERNAL_SERVER_ERROR => "Internal Server Error",
        STATUS_SERVICE_UNAVAILABLE => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Parses the 16-byte fixed16 header.
///
/// Layout:
///
/// - bytes 0-2: status code (ASCII digits)
/// - byte 3: space (ASCII 32)
/// - bytes 4-14: payload length as ASCII int, left-padded by spaces
/// - byte 15: newline (ASCII 10)
///
/// The separator bytes at positions 3 and 15 are not enforced: extant server
/// implementations emit non-canonical delimiters, and the digit fields alone
/// are authoritative.
pub fn parse_fixed16_header(hdr: &[u8]) -> Result<(u16, i64), LivestatusError> {
    if hdr.len() != FIXED16_HEADER_LEN {
        return Err(LivestatusError::Header(format!(
            "fixed16 header must be 16 bytes, got {}",
            hdr.len()
        )));
    }
    let code = String::from_utf8_lossy(&hdr[0..3]);
    let code: u16 = code.trim().parse().map_err(|_| {
        LivestatusError::Header(format!(
            "invalid status code in header {:?}",
            String::from_utf8_lossy(hdr)
        ))
    })?;
    let length = String::from_utf8_lossy(&hdr[4..15]);
    let length: i64 = length.trim().parse().map_err(|_| {
        LivestatusError::Header(format!(
            "invalid length in header {:?}",
            String::from_utf8_lossy(hdr)
        ))
    })?;
    Ok((code, length))
}

/// Encodes a fixed16 header for the given status code and body length.
///
/// The inverse of [`parse_fixed16_header`] for code in 0..=999 and length
/// below 10^11.
pub fn encode_fixed16_header(code: u16, length: u64) -> [u8; FIXED16_HEADER_LEN] {
    debug_assert!(code <= 999, "status code does not fit in 3 bytes");
    debug_assert!(length < 100_000_000_000, "length does not fit in 11 bytes");
    let rendered = format!("{code:>3} {length:>11}\n");
    let mut out = [0u8; FIXED16_HEADER_LEN];
    out.copy_from_slice(rendered.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok() {
        let (code, length) = parse_fixed16_header(b"200 00000000012\n").unwrap();
        assert_eq!(code, STATUS_OK);
        assert_eq!(length, 12);
    }

    #[test]
    fn parse_not_found() {
        let (code, length) = parse_fixed16_header(b"404 00000000005\n").unwrap();
        assert_eq!(code, STATUS_NOT_FOUND);
        assert_eq!(length, 5);
    }

    #[test]
    fn parse_bad_len() {
        // 15 bytes, missing trailing newline
        assert!(parse_fixed16_header(b"200 0000000001").is_err());
    }

    #[test]
    fn parse_invalid_code() {
        assert!(parse_fixed16_header(b"2X0 0000000001\n").is_err());
    }

    #[test]
    fn parse_invalid_length() {
        assert!(parse_fixed16_header(b"200 0000000X001\n").is_err());
    }

    #[test]
    fn parse_weird_separators_but_parsable() {
        // Not a space at pos 3, not a newline at pos 15; digit fields still parse.
        let hdr = *b"200X 0000000012X";
        let (code, length) = parse_fixed16_header(&hdr).unwrap();
        assert_eq!(code, 200);
        assert_eq!(length, 12);
    }

    #[test]
    fn encode_parse_roundtrip() {
        for (code, length) in [
            (0u16, 0u64),
            (200, 12),
            (404, 5),
            (503, 1),
            (999, 99_999_999_999),
        ] {
            let hdr = encode_fixed16_header(code, length);
            assert_eq!(hdr.len(), FIXED16_HEADER_LEN);
            let (got_code, got_length) = parse_fixed16_header(&hdr).unwrap();
            assert_eq!((got_code, got_length), (code, length as i64));
        }
    }

    #[test]
    fn status_text_known_and_unknown() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(400), "Bad Request");
        assert_eq!(status_text(401), "Unauthorized");
        assert_eq!(status_text(403), "Forbidden");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(500), "Internal Server Error");
        assert_eq!(status_text(503), "Service Unavailable");
        assert_eq!(status_text(418), "Unknown");
    }
}

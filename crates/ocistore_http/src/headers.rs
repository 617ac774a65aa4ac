//! `Content-Range`/`Range` parsing. Uses a non-standard form of
//! `Content-Range`: inclusive end, first byte equals last-bytes-received
//! plus one, and renders `Range: 0-<offset>` on Status/HEAD responses.
//!
//! Parsed directly off [`axum::http::HeaderMap`] rather than through a
//! typed-header extractor — the inclusive-end, no-unit form this protocol
//! actually sends doesn't fit the standard `bytes=start-end` grammar those
//! extractors expect.

use axum::http::HeaderMap;

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
}

fn parse_dash_pair(raw: &str) -> Option<(u64, u64)> {
    let mut parts = raw.splitn(2, '-');
    let start = parts.next()?.parse().ok()?;
    let end = parts.next()?.parse().ok()?;
    Some((start, end))
}

impl ContentRange {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let value = headers
            .get("content-range")
            .ok_or(Error::MissingHeader("content-range"))?;
        let raw = value.to_str().map_err(|_| Error::MalformedContentRange)?;
        let (start, end) = parse_dash_pair(raw).ok_or(Error::MalformedContentRange)?;
        Ok(ContentRange { start, end })
    }
}

/// Renders the `Range: 0-<offset>` header required on
/// PATCH/HEAD/GET-upload-status responses, where `<offset>` is the last
/// byte index already received (`bytes_received - 1`), or the literal
/// `0-0` for a fresh, empty session — see `DESIGN.md` for why `0-0` rather
/// than an empty range.
pub fn render_range(bytes_received: u64) -> String {
    if bytes_received == 0 {
        "0-0".to_string()
    } else {
        format!("0-{}", bytes_received - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inclusive_dash_pair() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", "5-9".parse().unwrap());
        let cr = ContentRange::from_headers(&headers).unwrap();
        assert_eq!(cr.start, 5);
        assert_eq!(cr.end, 9);
    }

    #[test]
    fn rejects_malformed_range() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", "bogus".parse().unwrap());
        assert!(ContentRange::from_headers(&headers).is_err());
    }

    #[test]
    fn renders_zero_range_for_empty_session() {
        assert_eq!(render_range(0), "0-0");
        assert_eq!(render_range(10), "0-9");
    }
}

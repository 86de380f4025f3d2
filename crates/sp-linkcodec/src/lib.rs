//! The link codec (spec §4.1): a pure, stateless encode/decode of a
//! [`TrackingPayload`] into a single URL path segment, plus the higher
//! level `build_url`/`parse_url` helpers the wrapper and the tracking
//! server use so neither ever has to coordinate state with the other —
//! the URL itself is the entire contract.
//!
//! Wire format: `{"act":..,"t_url":..,"msg_id":..,"rcpt":..}` compressed
//! with zlib framing (not raw DEFLATE — matches the reference
//! implementation's `compress/zlib`) and base64-URL encoded with padding
//! (matches Go's `base64.URLEncoding`, which is data_encoding's
//! `BASE64URL`, the padded variant).

use data_encoding::BASE64URL;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use reqwest::Url;
use sp_protocol::{Action, TrackingPayload};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed tracking path: {0}")]
    MalformedPath(String),
    #[error("tracking base url must not carry a query string")]
    QueryStringNotAllowed,
    #[error("unrecognized action name {0:?}, expected click/open/initial_open")]
    UnknownActionName(String),
    #[error("invalid tracking base url: {0}")]
    InvalidBase(String),
}

/// Encodes a tracking payload's fields into a single URL path segment
/// (no interior `/`).
pub fn encode(
    action: Action,
    target_link_url: &str,
    message_id: &str,
    recipient: &str,
) -> String {
    let payload = TrackingPayload {
        action,
        target_link_url: target_link_url.to_string(),
        message_id: message_id.to_string(),
        recipient: recipient.to_string(),
    };
    encode_payload(&payload)
}

/// Encodes an already-assembled payload. Serialization to JSON of a
/// well-formed [`TrackingPayload`] cannot fail, so this never returns an
/// error; compare `decode`, which can.
pub fn encode_payload(payload: &TrackingPayload) -> String {
    let json = serde_json::to_vec(payload).expect("TrackingPayload always serializes");
    encode_path(&json)
}

/// Inverts [`encode`]/[`encode_payload`]. Fails with
/// [`CodecError::MalformedPath`] on invalid base64, invalid zlib framing,
/// or JSON that does not parse as a [`TrackingPayload`].
pub fn decode(path_segment: &str) -> Result<TrackingPayload, CodecError> {
    let json = decode_path(path_segment)?;
    serde_json::from_slice(&json)
        .map_err(|e| CodecError::MalformedPath(format!("invalid payload json: {e}")))
}

/// Base64-URL(zlib(bytes)) — the raw byte-oriented half of the codec,
/// independent of the JSON payload shape. Exposed separately because the
/// round-trip invariant in spec §8 is stated over arbitrary byte
/// sequences, not just well-formed payloads.
pub fn encode_path(data: &[u8]) -> String {
    let mut zbuf = Vec::new();
    {
        let mut zw = ZlibEncoder::new(&mut zbuf, Compression::default());
        zw.write_all(data).expect("writing to a Vec cannot fail");
        zw.finish().expect("writing to a Vec cannot fail");
    }
    BASE64URL.encode(&zbuf)
}

/// Inverse of [`encode_path`].
pub fn decode_path(segment: &str) -> Result<Vec<u8>, CodecError> {
    let zdata = BASE64URL
        .decode(segment.as_bytes())
        .map_err(|e| CodecError::MalformedPath(format!("invalid base64: {e}")))?;
    let mut decoder = ZlibDecoder::new(&zdata[..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::MalformedPath(format!("invalid zlib stream: {e}")))?;
    Ok(out)
}

/// Builds a full tracking URL from a base (scheme+host+optional path),
/// an action name (`click`/`open`/`initial_open`), a message id, a
/// recipient, and (for clicks) the target link. Rejects a base carrying
/// a query string and an unrecognized action name.
pub fn build_url(
    tracking_base: &str,
    action_name: &str,
    message_id: &str,
    recipient: &str,
    target: &str,
) -> Result<String, CodecError> {
    let action =
        Action::from_name(action_name).ok_or_else(|| CodecError::UnknownActionName(action_name.to_string()))?;

    let base = Url::parse(tracking_base).map_err(|e| CodecError::InvalidBase(e.to_string()))?;
    if base.query().is_some() {
        return Err(CodecError::QueryStringNotAllowed);
    }

    let segment = encode(action, target, message_id, recipient);

    let mut joined = base;
    {
        let mut segments = joined
            .path_segments_mut()
            .map_err(|_| CodecError::InvalidBase("base url cannot be a base".to_string()))?;
        segments.pop_if_empty();
        segments.push(&segment);
    }
    Ok(joined.to_string())
}

/// The inverse of [`build_url`]: decodes the last path segment and
/// reconstructs the tracking base (scheme, host, and the path with the
/// encoded segment stripped off).
pub fn parse_url(url: &str) -> Result<(TrackingPayload, String), CodecError> {
    let parsed = Url::parse(url).map_err(|e| CodecError::InvalidBase(e.to_string()))?;
    let mut segments: Vec<&str> = parsed
        .path_segments()
        .ok_or_else(|| CodecError::InvalidBase("url cannot be a base".to_string()))?
        .collect();
    let last = segments
        .pop()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CodecError::MalformedPath("no path segment to decode".to_string()))?;

    let payload = decode(last)?;

    let mut base = parsed.clone();
    {
        let mut base_segments = base
            .path_segments_mut()
            .map_err(|_| CodecError::InvalidBase("url cannot be a base".to_string()))?;
        base_segments.clear();
        for s in &segments {
            base_segments.push(s);
        }
    }
    base.set_query(None);
    Ok((payload, base.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_round_trips() {
        for (action, target) in [
            (Action::Click, "https://example.com/x"),
            (Action::Open, ""),
            (Action::InitialOpen, ""),
        ] {
            let segment = encode(action, target, "f00dbeef00000000dead", "mary@example.net");
            assert!(!segment.contains('/'));
            let decoded = decode(&segment).unwrap();
            assert_eq!(decoded.action, action);
            assert_eq!(decoded.target_link_url, target);
            assert_eq!(decoded.message_id, "f00dbeef00000000dead");
            assert_eq!(decoded.recipient, "mary@example.net");
        }
    }

    #[test]
    fn arbitrary_bytes_round_trip() {
        for data in [
            &b""[..],
            &b"\x00\x01\x02\xff"[..],
            &b"the quick brown fox jumps over the lazy dog"[..],
        ] {
            let encoded = encode_path(data);
            let decoded = decode_path(&encoded).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(decode("not valid base64!!").is_err());
    }

    #[test]
    fn decode_rejects_bad_zlib() {
        let bogus = BASE64URL.encode(b"not zlib data at all");
        assert!(decode(&bogus).is_err());
    }

    #[test]
    fn decode_rejects_bad_json() {
        let encoded = encode_path(b"not json");
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn build_and_parse_url_round_trip() {
        let url = build_url(
            "https://track.example.com/t",
            "click",
            "f00dbeef00000000dead",
            "mary@example.net",
            "https://example.com/x",
        )
        .unwrap();
        assert!(url.starts_with("https://track.example.com/t/"));

        let (payload, base) = parse_url(&url).unwrap();
        assert_eq!(payload.action, Action::Click);
        assert_eq!(payload.target_link_url, "https://example.com/x");
        assert_eq!(base, "https://track.example.com/t");
    }

    #[test]
    fn build_url_rejects_query_string() {
        let err = build_url(
            "https://track.example.com/t?x=1",
            "open",
            "f00dbeef00000000dead",
            "mary@example.net",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::QueryStringNotAllowed));
    }

    #[test]
    fn build_url_rejects_unknown_action() {
        let err = build_url(
            "https://track.example.com/t",
            "bounce",
            "f00dbeef00000000dead",
            "mary@example.net",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::UnknownActionName(_)));
    }
}

//! Ordered decode pipeline for ambiguous binary frames.
//!
//! Some venues compress frames (Huobi gzips everything) or wrap them
//! in base64. Rather than sniffing ad hoc, every binary frame runs
//! through a fixed stage order: plain JSON, gzip+JSON, zlib+JSON,
//! then base64-decode and repeat. The first stage that yields valid
//! JSON wins. If every stage fails the frame is dropped and a bounded
//! raw sample is carried in the error for offline inspection.

use crate::error::{FeedError, FeedResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::Read;

/// Bytes of raw payload retained in an `UndecodableFrame` error.
const SAMPLE_LIMIT: usize = 256;

/// Decode a raw frame into JSON via the ordered stage pipeline.
pub fn decode_frame(raw: &[u8]) -> FeedResult<serde_json::Value> {
    if let Some(value) = decode_stages(raw) {
        return Ok(value);
    }

    // One level of base64 unwrapping, then the same stages again.
    if let Some(inner) = try_base64(raw) {
        if let Some(value) = decode_stages(&inner) {
            return Ok(value);
        }
    }

    Err(FeedError::UndecodableFrame {
        sample: sample_of(raw),
    })
}

fn decode_stages(raw: &[u8]) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_slice(raw) {
        return Some(value);
    }
    if let Some(bytes) = try_gzip(raw) {
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return Some(value);
        }
    }
    if let Some(bytes) = try_zlib(raw) {
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return Some(value);
        }
    }
    None
}

fn try_gzip(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut out).ok()?;
    Some(out)
}

fn try_zlib(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(raw).read_to_end(&mut out).ok()?;
    Some(out)
}

fn try_base64(raw: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    BASE64.decode(text).ok()
}

/// Bounded, log-safe sample of a raw payload.
fn sample_of(raw: &[u8]) -> String {
    let slice = &raw[..raw.len().min(SAMPLE_LIMIT)];
    match std::str::from_utf8(slice) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let hex: String = slice.iter().map(|b| format!("{b:02x}")).collect();
            format!("0x{hex}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_plain_json() {
        let value = decode_frame(br#"{"ping": 1}"#).unwrap();
        assert_eq!(value["ping"], 1);
    }

    #[test]
    fn test_gzip_json() {
        let raw = gzip(br#"{"ch": "market.btcusdt.depth.step0"}"#);
        let value = decode_frame(&raw).unwrap();
        assert_eq!(value["ch"], "market.btcusdt.depth.step0");
    }

    #[test]
    fn test_zlib_json() {
        let raw = zlib(br#"{"ok": true}"#);
        let value = decode_frame(&raw).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_base64_wrapped_gzip() {
        let inner = gzip(br#"{"nested": 42}"#);
        let raw = BASE64.encode(inner);
        let value = decode_frame(raw.as_bytes()).unwrap();
        assert_eq!(value["nested"], 42);
    }

    #[test]
    fn test_undecodable_carries_bounded_sample() {
        let garbage = vec![0xde, 0xad, 0xbe, 0xef];
        let err = decode_frame(&garbage).unwrap_err();
        match err {
            FeedError::UndecodableFrame { sample } => {
                assert_eq!(sample, "0xdeadbeef");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sample_is_bounded() {
        let garbage = vec![0xff; 10_000];
        let err = decode_frame(&garbage).unwrap_err();
        match err {
            FeedError::UndecodableFrame { sample } => {
                // 256 bytes -> 512 hex chars + "0x" prefix.
                assert!(sample.len() <= 2 + SAMPLE_LIMIT * 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

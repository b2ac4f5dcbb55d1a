//! Content-encoding normalization for intercepted payloads.
//!
//! Hooks always see plaintext: a `br` body is decoded before dispatch and
//! compressed again afterwards, so a subscriber that swaps the body for new
//! plaintext still produces a message whose bytes match its
//! `Content-Encoding` header. Every other encoding passes through untouched.
//!
//! An empty body stays empty in both directions. Bodyless replies (`304`,
//! `204`, answers to `HEAD`) keep the origin's `Content-Encoding: br` while
//! carrying no bytes, and an empty brotli stream does not decode.

use std::io::{Read, Write};

use bytes::Bytes;
use http::header::CONTENT_ENCODING;
use http::HeaderMap;
use thiserror::Error;

/// Encoding token for brotli.
pub const BROTLI: &str = "br";

const BUFFER_SIZE: usize = 4096;
const QUALITY: u32 = 5;
const WINDOW_BITS: u32 = 22;

/// Failure while compressing or decompressing a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("brotli encode failed: {0}")]
    Encode(std::io::Error),

    #[error("brotli decode failed: {0}")]
    Decode(std::io::Error),
}

/// The declared `Content-Encoding`, trimmed.
pub fn content_encoding(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

fn is_brotli(encoding: Option<&str>) -> bool {
    encoding.is_some_and(|token| token.eq_ignore_ascii_case(BROTLI))
}

/// Compress `bytes` when `encoding` names brotli, otherwise return them as-is.
pub fn maybe_reencode(bytes: Bytes, encoding: Option<&str>) -> Result<Bytes, CodecError> {
    if bytes.is_empty() || !is_brotli(encoding) {
        return Ok(bytes);
    }

    let mut writer =
        brotli::CompressorWriter::new(Vec::with_capacity(bytes.len()), BUFFER_SIZE, QUALITY, WINDOW_BITS);
    writer.write_all(&bytes).map_err(CodecError::Encode)?;
    writer.flush().map_err(CodecError::Encode)?;
    Ok(Bytes::from(writer.into_inner()))
}

/// Inverse of [`maybe_reencode`].
pub fn decode(bytes: Bytes, encoding: Option<&str>) -> Result<Bytes, CodecError> {
    if bytes.is_empty() || !is_brotli(encoding) {
        return Ok(bytes);
    }

    let mut decoder = brotli::Decompressor::new(bytes.as_ref(), BUFFER_SIZE);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CodecError::Decode)?;
    Ok(Bytes::from(out))
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame-to-record parser.

use crate::frame::{RawFrame, FRAME_START};
use crate::record::SensorRecord;
use thiserror::Error;

/// Per-frame parse failures. Never fatal: the caller logs and moves on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame has no start delimiter: {raw:?}")]
    MissingStartDelimiter { raw: String },

    #[error("invalid payload ({reason}): {raw:?}")]
    InvalidPayload { raw: String, reason: String },
}

impl ParseError {
    /// The offending text, for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::MissingStartDelimiter { raw } => raw,
            ParseError::InvalidPayload { raw, .. } => raw,
        }
    }
}

/// Decodes raw frames into sensor records.
///
/// Everything up to and including the first start delimiter is discarded;
/// the rest must be a JSON object. No field validation happens here.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameParser;

impl FrameParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one frame.
    pub fn parse(&self, frame: &RawFrame) -> Result<SensorRecord, ParseError> {
        let bytes = frame.as_bytes();

        let start = bytes
            .iter()
            .position(|&b| b == FRAME_START)
            .ok_or_else(|| ParseError::MissingStartDelimiter {
                raw: frame.to_text(),
            })?;

        let payload = &bytes[start + 1..];
        tracing::trace!(payload = %String::from_utf8_lossy(payload), "Decoding payload");

        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ParseError::InvalidPayload {
                raw: String::from_utf8_lossy(payload).into_owned(),
                reason: e.to_string(),
            })?;

        match value {
            serde_json::Value::Object(map) => Ok(SensorRecord::from_map(map)),
            other => Err(ParseError::InvalidPayload {
                raw: String::from_utf8_lossy(payload).into_owned(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

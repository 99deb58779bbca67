#![forbid(unsafe_code)]

use crate::domain::{CanonicalMetadata, CanonicalObject};
use crate::error::{Error, Result};
use crate::protocol::Segment;
use bytes::Bytes;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_STREAM_BYTES: usize = 64 * 1024;

/// Decodes request input segments: an optional object descriptor followed by
/// label/content stream pairs.
#[derive(Clone, Copy, Debug)]
pub struct PayloadExtractor {
    max_stream_bytes: usize,
}

impl Default for PayloadExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STREAM_BYTES)
    }
}

impl PayloadExtractor {
    pub const fn new(max_stream_bytes: usize) -> Self {
        Self { max_stream_bytes }
    }

    pub const fn max_stream_bytes(&self) -> usize {
        self.max_stream_bytes
    }

    /// First JSON segment parsed as the object descriptor; absence is valid.
    pub fn extract_object(&self, input: &[Segment]) -> Result<Option<CanonicalObject>> {
        let Some(first) = input.first() else {
            return Ok(None);
        };
        let value = first.as_json().ok_or_else(|| {
            Error::MalformedMessage(
                "first input segment must be a JSON object descriptor".to_string(),
            )
        })?;
        let object = serde_json::from_value(value.clone())
            .map_err(|err| Error::MalformedMessage(format!("invalid object descriptor: {err}")))?;
        Ok(Some(object))
    }

    /// Canonical metadata carried by the object descriptor, when both exist.
    pub fn extract_metadata(&self, input: &[Segment]) -> Result<Option<CanonicalMetadata>> {
        match self.extract_object(input)? {
            Some(object) => object.metadata(),
            None => Ok(None),
        }
    }

    /// Streams follow the descriptor strictly as label/content segment pairs.
    /// A stream larger than the configured cap is rejected, not truncated.
    pub fn extract_streams(&self, input: &[Segment]) -> Result<BTreeMap<String, Bytes>> {
        let mut streams = BTreeMap::new();
        let mut rest = input.iter().skip(1);
        while let Some(segment) = rest.next() {
            let label = segment
                .as_json()
                .and_then(|value| value.get("id"))
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    Error::MalformedMessage(
                        "expected a JSON segment with an `id` naming the following stream"
                            .to_string(),
                    )
                })?;
            let content = rest.next().and_then(Segment::as_bytes).ok_or_else(|| {
                Error::MalformedMessage(format!("stream `{label}` is missing its binary segment"))
            })?;
            if content.len() > self.max_stream_bytes {
                return Err(Error::MalformedMessage(format!(
                    "stream `{label}` exceeds the {} byte limit",
                    self.max_stream_bytes
                )));
            }
            streams.insert(label.to_string(), content.clone());
        }
        Ok(streams)
    }
}

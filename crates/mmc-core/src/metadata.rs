//! Per-frame metadata.
//!
//! An ordered string → string map. The acquisition engine always sets
//! [`tags::CAMERA`] and [`tags::PIXEL_TYPE`]; cameras may contribute their
//! own tags.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known tag names.
pub mod tags {
    /// Label of the camera that produced the frame.
    pub const CAMERA: &str = "Camera";
    /// Pixel format (`GRAY8`, `GRAY16`, `RGB32`, ...).
    pub const PIXEL_TYPE: &str = "PixelType";
    /// Image width in pixels.
    pub const WIDTH: &str = "Width";
    /// Image height in pixels.
    pub const HEIGHT: &str = "Height";
    /// Camera binning.
    pub const BINNING: &str = "Binning";
    /// Exposure in milliseconds.
    pub const EXPOSURE_MS: &str = "Exposure-ms";
    /// Zero-based index within the sequence.
    pub const IMAGE_NUMBER: &str = "ImageNumber";
    /// Milliseconds since the sequence started.
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
    /// Wall-clock time the frame reached the core.
    pub const TIME_RECEIVED: &str = "TimeReceivedByCore";
}

/// Ordered tag map attached to one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    tags: BTreeMap<String, String>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl ToString) {
        self.tags.insert(key.into(), value.to_string());
    }

    /// Builder form of [`Metadata::put`].
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.put(key, value);
        self
    }

    /// Value of `key`, or `MetadataKeyNotFound`.
    pub fn get(&self, key: &str) -> CoreResult<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CoreError::MetadataKeyNotFound(key.to_string()))
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Tag names in order.
    pub fn keys(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Iterates over (key, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no tag is set.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Copies every tag of `other` into `self`.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.tags {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    /// JSON object form, as handed to storage sinks.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.tags).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.put(k, v);
        }
        md
    }
}

//! Artifact values produced during a run
//!
//! A [`Figure`] is a rendered image carried as raw bytes together with a file
//! extension. The engine never interprets the bytes, it only writes them into
//! the archive. A [`TrackValue`] is anything that can be appended to a tracked
//! time series: a plain number or a figure.

use serde_json::Value;

/// A rendered figure, ready to be written into an archive.
#[derive(Debug, Clone)]
pub struct Figure {
    bytes: Vec<u8>,
    extension: String,
}

impl Figure {
    /// Create a figure from raw image bytes and a file extension
    /// (without the leading dot, e.g. `"png"`).
    pub fn new(bytes: impl Into<Vec<u8>>, extension: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            extension: extension.into(),
        }
    }

    /// Create an SVG figure from markup.
    pub fn svg(markup: impl Into<String>) -> Self {
        Self::new(markup.into().into_bytes(), "svg")
    }

    /// Create a PNG figure from encoded bytes.
    pub fn png(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, "png")
    }

    /// The encoded image bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// A single value appended to a tracked series.
#[derive(Debug, Clone)]
pub enum TrackValue {
    /// A numeric sample, stored in the run data under the tracked key.
    Number(f64),
    /// A figure, written as a numbered file into the archive's track folder.
    Figure(Figure),
}

impl TrackValue {
    /// Whether this sample is a figure rather than a plain number.
    #[must_use]
    pub fn is_figure(&self) -> bool {
        matches!(self, Self::Figure(_))
    }
}

impl From<f64> for TrackValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for TrackValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u32> for TrackValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<f32> for TrackValue {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<Figure> for TrackValue {
    fn from(figure: Figure) -> Self {
        Self::Figure(figure)
    }
}

/// Numeric samples from a JSON array, ignoring entries that are not numbers.
/// Used when rendering plots from tracked series that may mix numbers with
/// figure file names.
#[must_use]
pub fn numeric_samples(values: &[Value]) -> Vec<f64> {
    values.iter().filter_map(Value::as_f64).collect()
}

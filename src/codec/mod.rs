//! Columnar codec for derived artifacts
//!
//! Derived artifacts (trajectories, PR curves) are written twice next to their
//! canonical JSON: a full-resolution file and a UI-resolution file. Both are
//! plain column sets plus string metadata, so the codec knows nothing about the
//! domain; [`trajectory`] and [`pr_curve`] do the mapping.
//!
//! The binary capability is optional. [`default_codec`] picks
//! [`ArrowIpcCodec`] when the `ipc` feature is compiled in and [`NoopCodec`]
//! otherwise; callers hold a [`CodecHandle`] and never branch on availability.

#[cfg(feature = "ipc")]
pub mod arrow_ipc;
pub mod pr_curve;
pub mod trajectory;

#[cfg(feature = "ipc")]
pub use arrow_ipc::ArrowIpcCodec;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Error, Result};

/// A typed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// 32-bit floats (coordinates, precision, recall, F1).
    Float32(Vec<f32>),
    /// 64-bit floats (timestamps, thresholds).
    Float64(Vec<f64>),
    /// 64-bit integers (frame ids).
    Int64(Vec<i64>),
    /// Flags.
    Bool(Vec<bool>),
}

impl Column {
    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// True if the column holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values widened to `f64`; `None` for flag columns.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float32(v) => Some(v.iter().map(|x| f64::from(*x)).collect()),
            Self::Float64(v) => Some(v.clone()),
            Self::Int64(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Self::Bool(_) => None,
        }
    }

    /// Flag values, if this is a flag column.
    #[must_use]
    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Integer values, if this is an integer column.
    #[must_use]
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Self::Int64(v) => Some(v),
            _ => None,
        }
    }
}

/// Named columns; lengths may differ.
pub type SeriesMap = BTreeMap<String, Column>;

/// String metadata stored alongside the columns.
pub type Metadata = BTreeMap<String, String>;

/// Columns and metadata read back from a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnarFrame {
    /// Columns by name.
    pub columns: SeriesMap,
    /// Metadata by key.
    pub metadata: Metadata,
}

impl ColumnarFrame {
    /// Numeric column widened to `f64`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` if the column is missing or not numeric.
    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        self.columns
            .get(name)
            .and_then(Column::to_f64)
            .ok_or_else(|| Error::Codec(format!("missing numeric column '{name}'")))
    }

    /// Like [`f64_column`](Self::f64_column), but empty when absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` if the column exists and is not numeric.
    pub fn optional_f64_column(&self, name: &str) -> Result<Vec<f64>> {
        if self.columns.contains_key(name) {
            self.f64_column(name)
        } else {
            Ok(Vec::new())
        }
    }

    /// Raw metadata value.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Metadata value parsed as `T`; `None` if absent or unparsable.
    #[must_use]
    pub fn meta_parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.meta(key).and_then(|v| v.parse().ok())
    }
}

/// Which variant of a derived artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    /// Full fidelity.
    Full,
    /// Downsampled for interactive consumers.
    Ui,
}

impl Resolution {
    /// File suffix of the binary variant.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Full => ".arrow",
            Self::Ui => ".ui.arrow",
        }
    }

    /// Name used in metadata, manifests and cache keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Ui => "ui",
        }
    }

    /// The other resolution.
    #[must_use]
    pub const fn other(&self) -> Self {
        match self {
            Self::Full => Self::Ui,
            Self::Ui => Self::Full,
        }
    }
}

/// Reads and writes column sets as files.
///
/// A codec whose capability is absent reports `Ok(None)` from both calls and
/// never errors.
pub trait ColumnarCodec: Send + Sync + Debug {
    /// Codec name for logs.
    fn name(&self) -> &'static str;

    /// Whether `write` actually produces files.
    fn is_available(&self) -> bool;

    /// Write `series` and `metadata` to `path`, replacing it atomically.
    ///
    /// Returns the number of bytes written, or `None` if nothing was written.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the atomic write fails.
    fn write(&self, path: &Path, series: &SeriesMap, metadata: &Metadata) -> Result<Option<u64>>;

    /// Read a file written by `write`. `None` if absent or unsupported.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be decoded.
    fn read(&self, path: &Path) -> Result<Option<ColumnarFrame>>;

    /// Read only the metadata of a file.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    fn read_metadata(&self, path: &Path) -> Result<Option<Metadata>> {
        Ok(self.read(path)?.map(|frame| frame.metadata))
    }
}

/// Shared codec handle.
pub type CodecHandle = Arc<dyn ColumnarCodec>;

/// Codec used when no binary format is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl ColumnarCodec for NoopCodec {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn write(&self, _path: &Path, _series: &SeriesMap, _metadata: &Metadata) -> Result<Option<u64>> {
        Ok(None)
    }

    fn read(&self, _path: &Path) -> Result<Option<ColumnarFrame>> {
        Ok(None)
    }
}

/// The best codec compiled into this build.
#[must_use]
pub fn default_codec() -> CodecHandle {
    #[cfg(feature = "ipc")]
    {
        Arc::new(ArrowIpcCodec::new())
    }
    #[cfg(not(feature = "ipc"))]
    {
        Arc::new(NoopCodec)
    }
}

pub(crate) fn meta_f64(metadata: &mut Metadata, key: &str, value: f64) {
    metadata.insert(key.to_string(), format!("{value}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_codec_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.arrow");
        let codec = NoopCodec;
        let series = SeriesMap::from([("x".to_string(), Column::Float64(vec![1.0]))]);
        assert_eq!(codec.write(&path, &series, &Metadata::new()).unwrap(), None);
        assert!(!path.exists());
        assert_eq!(codec.read(&path).unwrap(), None);
        assert!(!codec.is_available());
    }

    #[test]
    fn test_resolution_suffixes() {
        assert_eq!(Resolution::Full.suffix(), ".arrow");
        assert_eq!(Resolution::Ui.suffix(), ".ui.arrow");
        assert_eq!(Resolution::Ui.other(), Resolution::Full);
    }

    #[test]
    fn test_frame_accessors() {
        let mut frame = ColumnarFrame::default();
        frame.columns.insert("x".to_string(), Column::Float32(vec![1.5]));
        frame.columns.insert("flag".to_string(), Column::Bool(vec![true]));
        frame.metadata.insert("points".to_string(), "1".to_string());

        assert_eq!(frame.f64_column("x").unwrap(), vec![1.5]);
        assert!(frame.f64_column("flag").is_err());
        assert!(frame.optional_f64_column("gt_x").unwrap().is_empty());
        assert_eq!(frame.meta_parse::<usize>("points"), Some(1));
    }

    #[cfg(feature = "ipc")]
    #[test]
    fn test_default_codec_is_arrow() {
        assert_eq!(default_codec().name(), "arrow-ipc");
    }
}

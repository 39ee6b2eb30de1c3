//! On-disk encodings and file suffixes
//!
//! A record's shape picks the encoding (JSON text or Parquet binary), the
//! caller picks compression (gzip). Together they fix the file suffix, and
//! `load` probes suffixes in [`StoredFormat::PROBE_ORDER`].

use std::io::{Read, Write};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use super::Record;
use crate::{Error, Result};

/// Structured encoding of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `serde_json` text
    Json,
    /// Parquet (numeric tables)
    Parquet,
}

/// Encoding plus compression flag, i.e. everything that determines a suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoredFormat {
    /// Structured encoding
    pub encoding: Encoding,
    /// Whether the encoded bytes are gzipped
    pub compressed: bool,
}

impl StoredFormat {
    /// Lookup priority: binary-compressed, binary, text-compressed, text.
    pub const PROBE_ORDER: [Self; 4] = [
        Self::new(Encoding::Parquet, true),
        Self::new(Encoding::Parquet, false),
        Self::new(Encoding::Json, true),
        Self::new(Encoding::Json, false),
    ];

    /// Create a format descriptor
    #[must_use]
    pub const fn new(encoding: Encoding, compressed: bool) -> Self {
        Self {
            encoding,
            compressed,
        }
    }

    /// File suffix appended to the key
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match (self.encoding, self.compressed) {
            (Encoding::Parquet, true) => ".parquet.gz",
            (Encoding::Parquet, false) => ".parquet",
            (Encoding::Json, true) => ".json.gz",
            (Encoding::Json, false) => ".json",
        }
    }

    /// Short label used in logs and manifests
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match (self.encoding, self.compressed) {
            (Encoding::Parquet, true) => "parquet+gzip",
            (Encoding::Parquet, false) => "parquet",
            (Encoding::Json, true) => "json+gzip",
            (Encoding::Json, false) => "json",
        }
    }

    /// Split a file name into key leaf and format, if it carries a known suffix.
    #[must_use]
    pub fn split_file_name(name: &str) -> Option<(&str, Self)> {
        Self::PROBE_ORDER.iter().find_map(|format| {
            name.strip_suffix(format.suffix())
                .filter(|stem| !stem.is_empty())
                .map(|stem| (stem, *format))
        })
    }
}

/// Serialize a record into the bytes that land on disk.
///
/// # Errors
///
/// Returns `Error::Serialization` if the record cannot be encoded.
pub fn encode(key: &str, record: &Record, compressed: bool) -> Result<Vec<u8>> {
    let raw = match record {
        Record::Json(value) => {
            // Compressed copies are for machines; plain ones get read by people
            if compressed {
                serde_json::to_vec(value)
            } else {
                serde_json::to_vec_pretty(value)
            }
            .map_err(|e| Error::serialization(key, e))?
        }
        Record::Table(batch) => table_to_parquet(batch).map_err(|e| Error::serialization(key, e))?,
    };

    if compressed {
        gzip(&raw).map_err(|e| Error::serialization(key, format!("gzip failed: {e}")))
    } else {
        Ok(raw)
    }
}

/// Decode on-disk bytes for `format` back into a record.
///
/// # Errors
///
/// Returns `Error::Serialization` for truncated, corrupt or mislabeled files.
pub fn decode(key: &str, format: StoredFormat, bytes: &[u8]) -> Result<Record> {
    let raw = if format.compressed {
        gunzip(bytes).map_err(|e| Error::serialization(key, format!("gunzip failed: {e}")))?
    } else {
        bytes.to_vec()
    };

    match format.encoding {
        Encoding::Json => serde_json::from_slice(&raw)
            .map(Record::Json)
            .map_err(|e| Error::serialization(key, e)),
        Encoding::Parquet => parquet_to_table(raw)
            .map(Record::Table)
            .map_err(|e| Error::serialization(key, e)),
    }
}

/// Gzip `data`. The header carries no timestamp, so equal input gives equal bytes.
pub(crate) fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(crate) fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn table_to_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    if batch.num_columns() == 0 {
        return Err(Error::InvalidInput(
            "tables without columns cannot be stored".to_string(),
        ));
    }
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buf)
}

fn parquet_to_table(raw: Vec<u8>) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(raw))?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(arrow::compute::concat_batches(&schema, &batches)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample_table() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("frame_id", DataType::Int64, false),
            Field::new("score", DataType::Float64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![0.5, 0.25, 0.125])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_suffixes_are_distinct_and_ordered() {
        let suffixes: Vec<_> = StoredFormat::PROBE_ORDER.iter().map(StoredFormat::suffix).collect();
        assert_eq!(suffixes, vec![".parquet.gz", ".parquet", ".json.gz", ".json"]);
    }

    #[test]
    fn test_split_file_name() {
        assert_eq!(
            StoredFormat::split_file_name("summary.json.gz"),
            Some(("summary", StoredFormat::new(Encoding::Json, true)))
        );
        assert_eq!(
            StoredFormat::split_file_name("000042.json"),
            Some(("000042", StoredFormat::new(Encoding::Json, false)))
        );
        assert_eq!(StoredFormat::split_file_name("alg.ui.arrow"), None);
        assert_eq!(StoredFormat::split_file_name(".json"), None);
    }

    #[test]
    fn test_json_roundtrip_compressed_and_plain() {
        let value = serde_json::json!({"a": [1, 2, 3], "b": {"c": "d"}});
        for compressed in [false, true] {
            let record = Record::Json(value.clone());
            let bytes = encode("k", &record, compressed).unwrap();
            let format = StoredFormat::new(Encoding::Json, compressed);
            assert_eq!(decode("k", format, &bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_gzip_is_deterministic() {
        let data = b"trajectory trajectory trajectory".to_vec();
        assert_eq!(gzip(&data).unwrap(), gzip(&data).unwrap());
    }

    #[test]
    fn test_table_roundtrip() {
        let batch = sample_table();
        for compressed in [false, true] {
            let bytes = encode("t", &Record::Table(batch.clone()), compressed).unwrap();
            let format = StoredFormat::new(Encoding::Parquet, compressed);
            let Record::Table(decoded) = decode("t", format, &bytes).unwrap() else {
                panic!("expected table");
            };
            assert_eq!(decoded.num_rows(), 3);
            assert_eq!(decoded.columns(), batch.columns());
        }
    }

    #[test]
    fn test_corrupt_bytes_are_serialization_errors() {
        let err = decode("bad", StoredFormat::new(Encoding::Json, true), b"not gzip").unwrap_err();
        assert!(err.is_serialization());
        let err = decode("bad", StoredFormat::new(Encoding::Json, false), b"{oops").unwrap_err();
        assert!(err.is_serialization());
        let err = decode("bad", StoredFormat::new(Encoding::Parquet, false), b"PAR").unwrap_err();
        assert!(err.is_serialization());
    }
}

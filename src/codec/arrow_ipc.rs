//! Arrow IPC file codec (`.arrow` / `.ui.arrow`)
//!
//! One record batch per file. Arrow needs equal-length columns, so the batch
//! is sized to the longest column and shorter ones are null-padded; every
//! field carries its true length in the `length` metadata entry and `read`
//! truncates to it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::debug;

use super::{Column, ColumnarCodec, ColumnarFrame, Metadata, SeriesMap};
use crate::error::StorageOp;
use crate::store::write_atomic;
use crate::{Error, Result};

/// Field metadata key holding a column's unpadded length.
pub const LENGTH_KEY: &str = "length";

/// Arrow IPC file codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrowIpcCodec;

impl ArrowIpcCodec {
    /// Create the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn encode(series: &SeriesMap, metadata: &Metadata) -> Result<Vec<u8>> {
        let rows = series.values().map(Column::len).max().unwrap_or(0);
        let mut fields = Vec::with_capacity(series.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(series.len());

        for (name, column) in series {
            let present = |i: usize| i < column.len();
            let (data_type, array): (DataType, ArrayRef) = match column {
                Column::Float32(v) => (
                    DataType::Float32,
                    Arc::new((0..rows).map(|i| present(i).then(|| v[i])).collect::<Float32Array>()),
                ),
                Column::Float64(v) => (
                    DataType::Float64,
                    Arc::new((0..rows).map(|i| present(i).then(|| v[i])).collect::<Float64Array>()),
                ),
                Column::Int64(v) => (
                    DataType::Int64,
                    Arc::new((0..rows).map(|i| present(i).then(|| v[i])).collect::<Int64Array>()),
                ),
                Column::Bool(v) => (
                    DataType::Boolean,
                    Arc::new((0..rows).map(|i| present(i).then(|| v[i])).collect::<BooleanArray>()),
                ),
            };
            let field_meta = HashMap::from([(LENGTH_KEY.to_string(), column.len().to_string())]);
            fields.push(Field::new(name.as_str(), data_type, true).with_metadata(field_meta));
            arrays.push(array);
        }

        let schema_meta: HashMap<String, String> =
            metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let schema = Arc::new(Schema::new_with_metadata(fields, schema_meta));
        let batch = RecordBatch::try_new_with_options(
            schema.clone(),
            arrays,
            &RecordBatchOptions::new().with_row_count(Some(rows)),
        )?;

        let mut buffer = Vec::new();
        {
            let mut writer = FileWriter::try_new(&mut buffer, &schema)?;
            writer.write(&batch)?;
            writer.finish()?;
        }
        Ok(buffer)
    }
}

impl ColumnarCodec for ArrowIpcCodec {
    fn name(&self) -> &'static str {
        "arrow-ipc"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn write(&self, path: &Path, series: &SeriesMap, metadata: &Metadata) -> Result<Option<u64>> {
        let bytes = Self::encode(series, metadata)?;
        write_atomic(path, &bytes)
            .map_err(|e| Error::storage(path.display().to_string(), StorageOp::Save, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote arrow ipc file");
        Ok(Some(bytes.len() as u64))
    }

    fn read(&self, path: &Path) -> Result<Option<ColumnarFrame>> {
        let Some(reader) = open_reader(path)? else {
            return Ok(None);
        };
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = arrow::compute::concat_batches(&schema, &batches)?;

        let mut columns = SeriesMap::new();
        for (i, field) in schema.fields().iter().enumerate() {
            let len = field
                .metadata()
                .get(LENGTH_KEY)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(batch.num_rows())
                .min(batch.num_rows());
            let array = batch.column(i);
            let name = field.name();
            let column = match field.data_type() {
                DataType::Float32 => Column::Float32(
                    downcast::<Float32Array>(array, name)?
                        .iter()
                        .take(len)
                        .map(|v| v.unwrap_or(f32::NAN))
                        .collect(),
                ),
                DataType::Float64 => Column::Float64(
                    downcast::<Float64Array>(array, name)?
                        .iter()
                        .take(len)
                        .map(|v| v.unwrap_or(f64::NAN))
                        .collect(),
                ),
                DataType::Int64 => Column::Int64(
                    downcast::<Int64Array>(array, name)?
                        .iter()
                        .take(len)
                        .map(|v| v.unwrap_or_default())
                        .collect(),
                ),
                DataType::Boolean => Column::Bool(
                    downcast::<BooleanArray>(array, name)?
                        .iter()
                        .take(len)
                        .map(|v| v.unwrap_or_default())
                        .collect(),
                ),
                other => {
                    return Err(Error::Codec(format!(
                        "unsupported type {other} for column '{name}' in {}",
                        path.display()
                    )))
                }
            };
            columns.insert(name.clone(), column);
        }

        let metadata = schema
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Some(ColumnarFrame { columns, metadata }))
    }

    fn read_metadata(&self, path: &Path) -> Result<Option<Metadata>> {
        Ok(open_reader(path)?.map(|reader| {
            reader
                .schema()
                .metadata()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }))
    }
}

fn open_reader(path: &Path) -> Result<Option<FileReader<BufReader<File>>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(path.display().to_string(), StorageOp::Load, e)),
    };
    Ok(Some(FileReader::try_new(BufReader::new(file), None)?))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Codec(format!("column '{name}' has an unexpected array type")))
}

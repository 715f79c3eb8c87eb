//! Chromatogram and mobilogram time-series storage.
//!
//! Both entities are named (x, y) series independent of any spectrum row:
//! a chromatogram pairs time with intensity, a mobilogram pairs mobility
//! with intensity. They persist in separate column groups using a "Wide"
//! layout (one row per trace, arrays as Parquet lists) so a whole trace
//! decodes in one read. The Parquet plumbing is shared; only the value
//! types and schemas differ.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, ListArray, ListBuilder, StringArray,
    StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::schema::{chromatogram_schema, mobilogram_schema, trace_columns};

/// Errors raised while writing or reading trace column groups.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow array construction failed.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet encode/decode failed.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// A trace's axes disagree in length.
    #[error("trace '{id}': x array has {x_len} points, intensity array has {y_len}")]
    LengthMismatch {
        /// Trace label.
        id: String,
        /// Length of the x (time/mobility) array.
        x_len: usize,
        /// Length of the intensity array.
        y_len: usize,
    },

    /// A persisted trace table lacks a required column.
    #[error("trace table missing column: {0}")]
    MissingColumn(&'static str),
}

/// A named intensity-over-time trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Chromatogram {
    /// Identifying label (e.g. "TIC", "BPC").
    pub id: String,
    /// Time values in seconds.
    pub time: Vec<f64>,
    /// Intensity values.
    pub intensity: Vec<f64>,
}

impl Chromatogram {
    /// Create a chromatogram, rejecting mismatched array lengths.
    pub fn new(
        id: impl Into<String>,
        time: Vec<f64>,
        intensity: Vec<f64>,
    ) -> Result<Self, TraceError> {
        let id = id.into();
        if time.len() != intensity.len() {
            return Err(TraceError::LengthMismatch {
                id,
                x_len: time.len(),
                y_len: intensity.len(),
            });
        }
        Ok(Self {
            id,
            time,
            intensity,
        })
    }

    /// Number of data points.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True when the trace has no points.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// A named intensity-over-mobility trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Mobilogram {
    /// Identifying label.
    pub id: String,
    /// Mobility values.
    pub mobility: Vec<f64>,
    /// Intensity values.
    pub intensity: Vec<f64>,
}

impl Mobilogram {
    /// Create a mobilogram, rejecting mismatched array lengths.
    pub fn new(
        id: impl Into<String>,
        mobility: Vec<f64>,
        intensity: Vec<f64>,
    ) -> Result<Self, TraceError> {
        let id = id.into();
        if mobility.len() != intensity.len() {
            return Err(TraceError::LengthMismatch {
                id,
                x_len: mobility.len(),
                y_len: intensity.len(),
            });
        }
        Ok(Self {
            id,
            mobility,
            intensity,
        })
    }

    /// Number of data points.
    pub fn len(&self) -> usize {
        self.mobility.len()
    }

    /// True when the trace has no points.
    pub fn is_empty(&self) -> bool {
        self.mobility.is_empty()
    }
}

/// Borrowed view of one trace row, shared by both entity types.
pub(crate) struct TraceRow<'a> {
    pub id: &'a str,
    pub x: &'a [f64],
    pub y: &'a [f64],
}

fn list_builder() -> ListBuilder<Float64Builder> {
    let item = Arc::new(Field::new("item", DataType::Float64, false));
    ListBuilder::new(Float64Builder::new()).with_field(item)
}

fn traces_to_batch(schema: Arc<Schema>, rows: &[TraceRow<'_>]) -> Result<RecordBatch, TraceError> {
    let mut ids = StringBuilder::new();
    let mut xs = list_builder();
    let mut ys = list_builder();

    for row in rows {
        ids.append_value(row.id);
        xs.values().append_slice(row.x);
        xs.append(true);
        ys.values().append_slice(row.y);
        ys.append(true);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()),
        Arc::new(xs.finish()),
        Arc::new(ys.finish()),
    ];
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn write_trace_file(
    path: &Path,
    schema: Arc<Schema>,
    rows: &[TraceRow<'_>],
) -> Result<(), TraceError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
    if !rows.is_empty() {
        writer.write(&traces_to_batch(schema, rows)?)?;
    }
    writer.close()?;
    Ok(())
}

/// Persist chromatograms to their column group file.
pub(crate) fn write_chromatograms(
    path: &Path,
    traces: &[Chromatogram],
) -> Result<(), TraceError> {
    let rows: Vec<TraceRow<'_>> = traces
        .iter()
        .map(|t| TraceRow {
            id: &t.id,
            x: &t.time,
            y: &t.intensity,
        })
        .collect();
    write_trace_file(path, Arc::new(chromatogram_schema()), &rows)
}

/// Persist mobilograms to their column group file.
pub(crate) fn write_mobilograms(path: &Path, traces: &[Mobilogram]) -> Result<(), TraceError> {
    let rows: Vec<TraceRow<'_>> = traces
        .iter()
        .map(|t| TraceRow {
            id: &t.id,
            x: &t.mobility,
            y: &t.intensity,
        })
        .collect();
    write_trace_file(path, Arc::new(mobilogram_schema()), &rows)
}

fn list_to_vec(list: &ListArray, row: usize) -> Result<Vec<f64>, TraceError> {
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or(TraceError::MissingColumn("list item"))?;
    Ok(values.values().to_vec())
}

fn read_trace_file(
    path: &Path,
    id_column: &'static str,
    x_column: &'static str,
) -> Result<Vec<(String, Vec<f64>, Vec<f64>)>, TraceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut traces = Vec::new();
    for batch in reader {
        let batch = batch?;
        let ids = batch
            .column_by_name(id_column)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or(TraceError::MissingColumn(id_column))?;
        let xs = batch
            .column_by_name(x_column)
            .and_then(|c| c.as_any().downcast_ref::<ListArray>())
            .ok_or(TraceError::MissingColumn(x_column))?;
        let ys = batch
            .column_by_name(trace_columns::INTENSITY_ARRAY)
            .and_then(|c| c.as_any().downcast_ref::<ListArray>())
            .ok_or(TraceError::MissingColumn(trace_columns::INTENSITY_ARRAY))?;

        for row in 0..batch.num_rows() {
            traces.push((
                ids.value(row).to_string(),
                list_to_vec(xs, row)?,
                list_to_vec(ys, row)?,
            ));
        }
    }
    Ok(traces)
}

/// Decode every chromatogram in the column group; empty when absent.
pub(crate) fn read_chromatograms(path: &Path) -> Result<Vec<Chromatogram>, TraceError> {
    let rows = read_trace_file(
        path,
        trace_columns::CHROMATOGRAM_ID,
        trace_columns::TIME_ARRAY,
    )?;
    Ok(rows
        .into_iter()
        .map(|(id, time, intensity)| Chromatogram {
            id,
            time,
            intensity,
        })
        .collect())
}

/// Decode every mobilogram in the column group; empty when absent.
pub(crate) fn read_mobilograms(path: &Path) -> Result<Vec<Mobilogram>, TraceError> {
    let rows = read_trace_file(
        path,
        trace_columns::MOBILOGRAM_ID,
        trace_columns::MOBILITY_ARRAY,
    )?;
    Ok(rows
        .into_iter()
        .map(|(id, mobility, intensity)| Mobilogram {
            id,
            mobility,
            intensity,
        })
        .collect())
}

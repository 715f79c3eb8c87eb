//! Arrow schema definitions for the peakrow bundle.
//!
//! The peaks table uses a "Long" layout: every individual peak is its own
//! row, with spectrum-level metadata repeated across the peaks of a
//! spectrum. Repeated columns compress to almost nothing under Parquet's
//! dictionary + RLE encodings, while the layout keeps every column
//! fixed-width and filter-pushdown friendly.
//!
//! ## Peaks schema
//!
//! | Column | Type | Nullable | Description |
//! |--------|------|----------|-------------|
//! | spectrum_id | Int64 | No | Unique spectrum identifier |
//! | spectrum_index | Int64 | No | Sequential position of first appearance |
//! | ms_level | Int16 | No | 1 = survey scan, >=2 = fragmentation |
//! | retention_time | Float64 | No | Seconds, denormalized per row |
//! | polarity | Int8 | No | 1 positive, -1 negative, 0 unknown |
//! | mz | Float64 | No | Mass-to-charge ratio |
//! | intensity | Float32 | No | Signal intensity |
//! | ion_mobility | Float64 | No | Per-peak drift value, placeholder where invalid |
//! | ion_mobility_valid | Boolean | No | Validity mask for ion_mobility |
//! | precursor_mz | Float64 | Yes | MS2+ only |
//! | precursor_charge | Int16 | Yes | MS2+ only, null when unknown |
//! | precursor_intensity | Float32 | Yes | MS2+ only |
//! | collision_energy | Float32 | Yes | MS2+ only |
//!
//! Ion mobility is per-peak optional, but Parquet's null encoding drops
//! null slots from data pages. To keep the column fixed-width and the
//! stored placeholders intact through a round trip, it persists as a
//! dense required column with an explicit boolean validity column, not
//! as a nullable column.
//!
//! Chromatograms and mobilograms use a "Wide" layout (one row per trace,
//! arrays stored as Parquet lists) so a full trace decodes without
//! touching the peak table.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaBuilder};

/// Bundle format version, embedded in the manifest and Parquet footers.
pub const FORMAT_VERSION: &str = "1.0.0";

/// Footer metadata key carrying the format version.
pub const KEY_FORMAT_VERSION: &str = "peakrow:format_version";

/// File name of the bundle manifest, written last on a clean close.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Relative path of the peaks table inside a bundle.
pub const PEAKS_FILE: &str = "peaks/peaks.parquet";

/// Relative path of the chromatograms table inside a bundle.
pub const CHROMATOGRAMS_FILE: &str = "chromatograms/chromatograms.parquet";

/// Relative path of the mobilograms table inside a bundle.
pub const MOBILOGRAMS_FILE: &str = "mobilograms/mobilograms.parquet";

/// Column names for the peaks table.
pub mod columns {
    /// Unique spectrum identifier.
    pub const SPECTRUM_ID: &str = "spectrum_id";
    /// Sequential position of the spectrum's first appearance.
    pub const SPECTRUM_INDEX: &str = "spectrum_index";
    /// MS level.
    pub const MS_LEVEL: &str = "ms_level";
    /// Retention time in seconds.
    pub const RETENTION_TIME: &str = "retention_time";
    /// Scan polarity.
    pub const POLARITY: &str = "polarity";
    /// Mass-to-charge ratio.
    pub const MZ: &str = "mz";
    /// Signal intensity.
    pub const INTENSITY: &str = "intensity";
    /// Dense ion mobility values.
    pub const ION_MOBILITY: &str = "ion_mobility";
    /// Validity mask for `ion_mobility`.
    pub const ION_MOBILITY_VALID: &str = "ion_mobility_valid";
    /// Precursor m/z.
    pub const PRECURSOR_MZ: &str = "precursor_mz";
    /// Precursor charge state.
    pub const PRECURSOR_CHARGE: &str = "precursor_charge";
    /// Precursor intensity.
    pub const PRECURSOR_INTENSITY: &str = "precursor_intensity";
    /// Collision energy in eV.
    pub const COLLISION_ENERGY: &str = "collision_energy";
}

/// Column names for the trace (chromatogram/mobilogram) tables.
pub mod trace_columns {
    /// Chromatogram label.
    pub const CHROMATOGRAM_ID: &str = "chromatogram_id";
    /// Mobilogram label.
    pub const MOBILOGRAM_ID: &str = "mobilogram_id";
    /// Time axis (chromatograms).
    pub const TIME_ARRAY: &str = "time_array";
    /// Mobility axis (mobilograms).
    pub const MOBILITY_ARRAY: &str = "mobility_array";
    /// Intensity values.
    pub const INTENSITY_ARRAY: &str = "intensity_array";
}

/// Creates the peaks Arrow schema in fixed column order.
///
/// The order here is the sealing order used by the batch assembler; the
/// reader validates against it on open.
pub fn peaks_schema() -> Schema {
    let mut builder = SchemaBuilder::new();

    builder.push(Field::new(columns::SPECTRUM_ID, DataType::Int64, false));
    builder.push(Field::new(columns::SPECTRUM_INDEX, DataType::Int64, false));
    builder.push(Field::new(columns::MS_LEVEL, DataType::Int16, false));
    builder.push(Field::new(columns::RETENTION_TIME, DataType::Float64, false));
    builder.push(Field::new(columns::POLARITY, DataType::Int8, false));
    builder.push(Field::new(columns::MZ, DataType::Float64, false));
    builder.push(Field::new(columns::INTENSITY, DataType::Float32, false));
    builder.push(Field::new(columns::ION_MOBILITY, DataType::Float64, false));
    builder.push(Field::new(
        columns::ION_MOBILITY_VALID,
        DataType::Boolean,
        false,
    ));
    builder.push(Field::new(columns::PRECURSOR_MZ, DataType::Float64, true));
    builder.push(Field::new(columns::PRECURSOR_CHARGE, DataType::Int16, true));
    builder.push(Field::new(
        columns::PRECURSOR_INTENSITY,
        DataType::Float32,
        true,
    ));
    builder.push(Field::new(columns::COLLISION_ENERGY, DataType::Float32, true));

    let mut metadata = std::collections::HashMap::new();
    metadata.insert(KEY_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string());

    builder.finish().with_metadata(metadata)
}

/// Arc-wrapped peaks schema for shared ownership across writer threads.
pub fn peaks_schema_arc() -> Arc<Schema> {
    Arc::new(peaks_schema())
}

fn trace_schema(id_column: &str, x_column: &str) -> Schema {
    let mut builder = SchemaBuilder::new();

    builder.push(Field::new(id_column, DataType::Utf8, false));
    builder.push(Field::new(
        x_column,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, false))),
        false,
    ));
    builder.push(Field::new(
        trace_columns::INTENSITY_ARRAY,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, false))),
        false,
    ));

    let mut metadata = std::collections::HashMap::new();
    metadata.insert(KEY_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string());

    builder.finish().with_metadata(metadata)
}

/// Creates the chromatogram schema (one row per trace).
pub fn chromatogram_schema() -> Schema {
    trace_schema(trace_columns::CHROMATOGRAM_ID, trace_columns::TIME_ARRAY)
}

/// Creates the mobilogram schema (one row per trace).
pub fn mobilogram_schema() -> Schema {
    trace_schema(trace_columns::MOBILOGRAM_ID, trace_columns::MOBILITY_ARRAY)
}

/// Errors raised when a persisted schema does not match the format.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A required column is absent.
    #[error("missing required column: {0}")]
    MissingColumn(String),

    /// A column exists with the wrong type.
    #[error("type mismatch for column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Offending column name.
        column: String,
        /// Type the format requires.
        expected: String,
        /// Type found in the file.
        found: String,
    },
}

/// Validates that a persisted peaks schema carries every required column
/// with the expected type. Extra columns are tolerated for forward
/// compatibility.
pub fn validate_peaks_schema(schema: &Schema) -> Result<(), SchemaError> {
    let required = [
        (columns::SPECTRUM_ID, DataType::Int64),
        (columns::SPECTRUM_INDEX, DataType::Int64),
        (columns::MS_LEVEL, DataType::Int16),
        (columns::RETENTION_TIME, DataType::Float64),
        (columns::POLARITY, DataType::Int8),
        (columns::MZ, DataType::Float64),
        (columns::INTENSITY, DataType::Float32),
        (columns::ION_MOBILITY, DataType::Float64),
        (columns::ION_MOBILITY_VALID, DataType::Boolean),
        (columns::PRECURSOR_MZ, DataType::Float64),
        (columns::PRECURSOR_CHARGE, DataType::Int16),
        (columns::PRECURSOR_INTENSITY, DataType::Float32),
        (columns::COLLISION_ENERGY, DataType::Float32),
    ];

    for (name, expected) in required {
        match schema.field_with_name(name) {
            Ok(field) => {
                if field.data_type() != &expected {
                    return Err(SchemaError::TypeMismatch {
                        column: name.to_string(),
                        expected: format!("{expected:?}"),
                        found: format!("{:?}", field.data_type()),
                    });
                }
            }
            Err(_) => return Err(SchemaError::MissingColumn(name.to_string())),
        }
    }

    Ok(())
}

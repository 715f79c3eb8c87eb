//! Column batch assembly.
//!
//! [`BatchAssembler`] accumulates spectra into Arrow column builders in
//! the fixed schema order of [`crate::schema::peaks_schema`] and seals
//! them into immutable [`RecordBatch`]es once a row-count threshold is
//! reached. Sealing happens only between spectra, so a spectrum's rows
//! never straddle two batches and random access by id touches a single
//! row group.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int64Builder,
    Int8Builder,
};
use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::spectrum::Spectrum;

/// Uncompressed width of one peak row in bytes, used for running size
/// accounting before compression.
pub const ROW_WIDTH_BYTES: usize = 66;

/// Accumulates spectra into sealed columnar batches.
pub struct BatchAssembler {
    schema: Arc<Schema>,
    target_rows: usize,
    rows: usize,
    spectrum_id: Int64Builder,
    spectrum_index: Int64Builder,
    ms_level: Int16Builder,
    retention_time: Float64Builder,
    polarity: Int8Builder,
    mz: Float64Builder,
    intensity: Float32Builder,
    ion_mobility: Float64Builder,
    ion_mobility_valid: BooleanBuilder,
    precursor_mz: Float64Builder,
    precursor_charge: Int16Builder,
    precursor_intensity: Float32Builder,
    collision_energy: Float32Builder,
}

impl BatchAssembler {
    /// Create an assembler sealing at `target_rows` peak rows.
    pub fn new(schema: Arc<Schema>, target_rows: usize) -> Self {
        Self {
            schema,
            target_rows: target_rows.max(1),
            rows: 0,
            spectrum_id: Int64Builder::new(),
            spectrum_index: Int64Builder::new(),
            ms_level: Int16Builder::new(),
            retention_time: Float64Builder::new(),
            polarity: Int8Builder::new(),
            mz: Float64Builder::new(),
            intensity: Float32Builder::new(),
            ion_mobility: Float64Builder::new(),
            ion_mobility_valid: BooleanBuilder::new(),
            precursor_mz: Float64Builder::new(),
            precursor_charge: Int16Builder::new(),
            precursor_intensity: Float32Builder::new(),
            collision_energy: Float32Builder::new(),
        }
    }

    /// Rows accumulated in the in-progress batch.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// True when no rows have been appended since the last seal.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// True once the in-progress batch has reached its target size.
    pub fn should_seal(&self) -> bool {
        self.rows >= self.target_rows
    }

    /// Append every peak of a validated spectrum to the in-progress
    /// batch. Spectrum-level columns repeat per peak; absent precursor
    /// fields become null bitmap slots, absent mobility becomes
    /// placeholder values with a false mask.
    pub fn push(&mut self, spectrum: &Spectrum) {
        let peaks = &spectrum.peaks;
        let n = peaks.len();

        for _ in 0..n {
            self.spectrum_id.append_value(spectrum.spectrum_id);
            self.spectrum_index.append_value(spectrum.spectrum_index);
            self.ms_level.append_value(spectrum.ms_level);
            self.retention_time.append_value(spectrum.retention_time);
            self.polarity.append_value(spectrum.polarity);
        }

        self.mz.append_slice(&peaks.mz);
        self.intensity.append_slice(&peaks.intensity);

        // The mobility column is dense: placeholder values are written
        // verbatim and the boolean column carries the mask, so invalid
        // slots survive a round trip byte-exact.
        match &peaks.ion_mobility {
            Some(mobility) => {
                self.ion_mobility.append_slice(&mobility.values);
                self.ion_mobility_valid.append_slice(&mobility.validity);
            }
            None => {
                for _ in 0..n {
                    self.ion_mobility.append_value(0.0);
                    self.ion_mobility_valid.append_value(false);
                }
            }
        }

        match &spectrum.precursor {
            Some(precursor) => {
                for _ in 0..n {
                    self.precursor_mz.append_value(precursor.mz);
                    self.precursor_charge.append_option(precursor.charge);
                    self.precursor_intensity.append_option(precursor.intensity);
                    self.collision_energy
                        .append_option(precursor.collision_energy);
                }
            }
            None => {
                self.precursor_mz.append_nulls(n);
                self.precursor_charge.append_nulls(n);
                self.precursor_intensity.append_nulls(n);
                self.collision_energy.append_nulls(n);
            }
        }

        self.rows += n;
    }

    /// Seal the in-progress batch, returning `None` when it is empty.
    ///
    /// The column builders reset on finish, so the assembler immediately
    /// begins a fresh batch. A sealed batch is never mutated.
    pub fn seal(&mut self) -> Result<Option<RecordBatch>, ArrowError> {
        if self.rows == 0 {
            return Ok(None);
        }

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(self.spectrum_id.finish()),
            Arc::new(self.spectrum_index.finish()),
            Arc::new(self.ms_level.finish()),
            Arc::new(self.retention_time.finish()),
            Arc::new(self.polarity.finish()),
            Arc::new(self.mz.finish()),
            Arc::new(self.intensity.finish()),
            Arc::new(self.ion_mobility.finish()),
            Arc::new(self.ion_mobility_valid.finish()),
            Arc::new(self.precursor_mz.finish()),
            Arc::new(self.precursor_charge.finish()),
            Arc::new(self.precursor_intensity.finish()),
            Arc::new(self.collision_energy.finish()),
        ];

        self.rows = 0;
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        Ok(Some(batch))
    }
}

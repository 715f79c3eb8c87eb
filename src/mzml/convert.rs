//! mzML to peakrow conversion.
//!
//! Drives a [`MzmlStreamer`] into a [`StoreWriter`], one scan record at a
//! time. Malformed records are logged, counted, and skipped so a large
//! real-world file with a few bad scans still converts; an unparsable
//! document or a writer failure aborts. A partially converted bundle has
//! no manifest and is rejected by the reader.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::spectrum::SpectrumArrays;
use crate::traces::Chromatogram;
use crate::writer::{StoreWriter, WriterConfig, WriterError};

use super::model::RawSpectrum;
use super::streamer::{MzmlError, MzmlStreamer};

/// Errors that abort a conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The source document is unparsable.
    #[error("source parse failed: {0}")]
    Parse(#[from] MzmlError),

    /// The destination writer failed.
    #[error("store write failed: {0}")]
    Write(#[from] WriterError),

    /// The conversion was cancelled between scan records.
    #[error("conversion aborted by caller")]
    Aborted,
}

/// Conversion configuration.
#[derive(Debug, Clone, Default)]
pub struct ConvertConfig {
    /// Configuration for the destination store.
    pub writer_config: WriterConfig,

    /// Cooperative cancellation flag, checked between scan records.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Statistics returned by a completed conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertStats {
    /// Spectra written to the store.
    pub spectra_count: u64,
    /// Spectra with ms_level == 1.
    pub ms1_spectra: u64,
    /// Spectra with ms_level == 2.
    pub ms2_spectra: u64,
    /// Total peaks written.
    pub peak_count: u64,
    /// Chromatogram traces written.
    pub chromatogram_count: u64,
    /// Malformed scan records skipped. Non-zero means data was dropped;
    /// it is reported, never silent.
    pub skipped_records: u64,
    /// Wall-clock conversion time.
    pub elapsed: Duration,
}

/// Converter from mzML files to peakrow bundles.
#[derive(Debug, Default)]
pub struct MzmlConverter {
    config: ConvertConfig,
}

impl MzmlConverter {
    /// Converter with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter with explicit configuration.
    pub fn with_config(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Convert `source` (mzML) into a bundle at `dest`.
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        dest: Q,
    ) -> Result<ConvertStats, ConvertError> {
        let source = source.as_ref();
        let dest = dest.as_ref();
        let started = Instant::now();

        info!("converting {} -> {}", source.display(), dest.display());

        let mut streamer = MzmlStreamer::open(source)?;
        let mut writer = StoreWriter::create(dest, self.config.writer_config.clone())?;

        let mut stats = ConvertStats::default();
        let mut next_index: i64 = 0;

        loop {
            if let Some(cancel) = &self.config.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ConvertError::Aborted);
                }
            }

            let raw = match streamer.next_spectrum() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) if e.is_record_local() => {
                    warn!("skipping malformed scan record: {e}");
                    stats.skipped_records += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let index = next_index;
            match self.spectrum_to_arrays(raw, index) {
                Ok(arrays) => {
                    let ms_level = arrays.ms_level;
                    let peaks = arrays.mz.len() as u64;
                    match writer.write_spectrum_arrays(arrays) {
                        Ok(()) => {
                            next_index += 1;
                            stats.spectra_count += 1;
                            stats.peak_count += peaks;
                            match ms_level {
                                1 => stats.ms1_spectra += 1,
                                2 => stats.ms2_spectra += 1,
                                _ => {}
                            }
                        }
                        // a record contradicting the model is a bad
                        // record, not a broken store
                        Err(WriterError::Validation(e)) => {
                            warn!("skipping invalid scan record: {e}");
                            stats.skipped_records += 1;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(reason) => {
                    warn!("skipping scan record: {reason}");
                    stats.skipped_records += 1;
                }
            }

            if stats.spectra_count > 0 && stats.spectra_count % 10_000 == 0 {
                match streamer.spectrum_count() {
                    Some(total) => info!(
                        "converted {}/{} spectra ({} peaks)",
                        stats.spectra_count, total, stats.peak_count
                    ),
                    None => info!(
                        "converted {} spectra ({} peaks)",
                        stats.spectra_count, stats.peak_count
                    ),
                }
            }
        }

        loop {
            match streamer.next_chromatogram() {
                Ok(Some(raw)) => {
                    match Chromatogram::new(raw.id, raw.time_array, raw.intensity_array) {
                        Ok(trace) => {
                            writer.write_chromatogram(trace)?;
                            stats.chromatogram_count += 1;
                        }
                        Err(e) => {
                            warn!("skipping malformed chromatogram: {e}");
                            stats.skipped_records += 1;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_record_local() => {
                    warn!("skipping malformed chromatogram record: {e}");
                    stats.skipped_records += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        writer.close()?;
        stats.elapsed = started.elapsed();

        info!(
            "conversion done: {} spectra (MS1 {}, MS2 {}), {} peaks, {} skipped, {:.1?}",
            stats.spectra_count,
            stats.ms1_spectra,
            stats.ms2_spectra,
            stats.peak_count,
            stats.skipped_records,
            stats.elapsed
        );

        Ok(stats)
    }

    /// Map a raw record to the store's ingestion bundle, or explain why
    /// it cannot be represented.
    fn spectrum_to_arrays(
        &self,
        mut raw: RawSpectrum,
        index: i64,
    ) -> Result<SpectrumArrays, String> {
        if raw.ms_level < 1 {
            return Err(format!(
                "spectrum '{}' declares no ms level",
                raw.native_id
            ));
        }
        if raw.mz_array.len() != raw.intensity_array.len() {
            return Err(format!(
                "spectrum '{}' has {} m/z values but {} intensities",
                raw.native_id,
                raw.mz_array.len(),
                raw.intensity_array.len()
            ));
        }

        let precursor = match (&raw.precursor, raw.ms_level) {
            (Some(p), level) if level >= 2 => {
                let Some(mz) = p.mz() else {
                    return Err(format!(
                        "fragmentation spectrum '{}' has a precursor without an m/z",
                        raw.native_id
                    ));
                };
                Some(crate::spectrum::Precursor {
                    mz,
                    charge: p.charge,
                    intensity: p.intensity.map(|v| v as f32),
                    collision_energy: p.collision_energy.map(|v| v as f32),
                })
            }
            (Some(_), _) => {
                return Err(format!(
                    "survey spectrum '{}' carries precursor data",
                    raw.native_id
                ))
            }
            (None, level) if level >= 2 => {
                return Err(format!(
                    "fragmentation spectrum '{}' has no precursor",
                    raw.native_id
                ))
            }
            (None, _) => None,
        };

        let ion_mobility = (!raw.mobility_array.is_empty()
            && raw.mobility_array.len() == raw.mz_array.len())
        .then(|| std::mem::take(&mut raw.mobility_array));

        let intensity = raw.intensity_array.iter().map(|&v| v as f32).collect();

        Ok(SpectrumArrays {
            spectrum_id: raw.scan_number(),
            spectrum_index: index,
            ms_level: raw.ms_level,
            retention_time: raw.retention_time.unwrap_or(0.0),
            polarity: raw.polarity,
            precursor,
            mz: raw.mz_array,
            intensity,
            ion_mobility,
            mobility_validity: None,
        })
    }
}

/// Convert `source` to `dest` with default configuration.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    dest: Q,
) -> Result<ConvertStats, ConvertError> {
    MzmlConverter::new().convert(source, dest)
}

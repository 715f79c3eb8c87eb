//! Store writer.
//!
//! [`StoreWriter`] owns a bundle directory exclusively from
//! [`StoreWriter::create`] until [`StoreWriter::close`]. Incoming spectra
//! are validated, accumulated by the batch assembler, and sealed batches
//! are handed to a background thread over a bounded channel; compression
//! and disk I/O happen off the ingest thread, and the enqueue blocks only
//! when the queue is full, which is the writer's backpressure against a
//! slow output device.
//!
//! Any flush failure poisons the writer: the error surfaces on the next
//! call and every operation afterwards fails with [`WriterError::Closed`].
//! Batches already flushed stay on disk, but the manifest is written only
//! by a successful `close()`, so readers reject the incomplete bundle.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use arrow::record_batch::RecordBatch;
use crossbeam_channel::{bounded, Sender};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use parquet::schema::types::ColumnPath;

use crate::batch::{BatchAssembler, ROW_WIDTH_BYTES};
use crate::manifest::{Manifest, StoreCounts};
use crate::schema::{
    self, columns, peaks_schema_arc, CHROMATOGRAMS_FILE, MANIFEST_FILE, MOBILOGRAMS_FILE,
    PEAKS_FILE,
};
use crate::spectrum::{Spectrum, SpectrumArrays, ValidationError};
use crate::traces::{self, Chromatogram, Mobilogram, TraceError};

/// Errors that can occur while writing a bundle.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow batch construction failed.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet encoding failed.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The spectrum violated a model invariant.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Writing a trace column group failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The destination path already exists.
    #[error("output path already exists: {0}")]
    AlreadyExists(String),

    /// The background flush thread failed; the writer is poisoned.
    #[error("flush pipeline failed: {0}")]
    Flush(String),

    /// Operation on a closed or poisoned writer.
    #[error("writer is closed")]
    Closed,
}

/// Compression codec for the peaks table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// ZSTD at the given level (best ratio).
    Zstd(i32),
    /// Snappy (faster writes, larger files).
    Snappy,
    /// No compression.
    Uncompressed,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Zstd(3)
    }
}

impl CompressionType {
    fn to_parquet(self) -> Compression {
        match self {
            CompressionType::Zstd(level) => {
                Compression::ZSTD(ZstdLevel::try_new(level).unwrap_or_default())
            }
            CompressionType::Snappy => Compression::SNAPPY,
            CompressionType::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

/// Store-level writer configuration. Compression and batch sizing live
/// here, not on individual calls.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Compression codec for the peaks table.
    pub compression: CompressionType,

    /// Peak rows per sealed batch. Each sealed batch becomes one Parquet
    /// row group, so this also bounds the reader's decode granularity.
    /// Larger batches compress better but raise peak memory and reduce
    /// flush granularity.
    pub batch_target_rows: usize,

    /// Sealed batches the flush queue holds before enqueueing blocks.
    pub flush_queue_capacity: usize,

    /// Whether to write per-chunk column statistics. Required for the
    /// reader's row-group pruning; disable only for write-once scratch
    /// output.
    pub write_statistics: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::Zstd(3),
            batch_target_rows: 65_536,
            flush_queue_capacity: 4,
            write_statistics: true,
        }
    }
}

impl WriterConfig {
    /// Balanced configuration (default).
    pub fn balanced() -> Self {
        Self::default()
    }

    /// Maximum compression for archival output; slower writes.
    pub fn max_compression() -> Self {
        Self {
            compression: CompressionType::Zstd(19),
            batch_target_rows: 262_144,
            ..Self::default()
        }
    }

    /// Fast writes at the cost of file size.
    pub fn fast_write() -> Self {
        Self {
            compression: CompressionType::Snappy,
            batch_target_rows: 32_768,
            ..Self::default()
        }
    }

    fn to_writer_properties(&self) -> WriterProperties {
        let statistics = if self.write_statistics {
            EnabledStatistics::Chunk
        } else {
            EnabledStatistics::None
        };

        // Row group boundaries are driven by explicit per-batch flushes,
        // not by this limit; it only has to stay out of the way.
        let mut builder = WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_statistics_enabled(statistics)
            .set_max_row_group_size(usize::MAX)
            .set_key_value_metadata(Some(vec![KeyValue {
                key: schema::KEY_FORMAT_VERSION.to_string(),
                value: Some(schema::FORMAT_VERSION.to_string()),
            }]));

        // Spectrum-level columns repeat for every peak of a spectrum;
        // dictionary + RLE collapse the repeats.
        let dict_columns = [
            columns::SPECTRUM_ID,
            columns::SPECTRUM_INDEX,
            columns::MS_LEVEL,
            columns::RETENTION_TIME,
            columns::POLARITY,
            columns::PRECURSOR_MZ,
            columns::PRECURSOR_CHARGE,
            columns::PRECURSOR_INTENSITY,
            columns::COLLISION_ENERGY,
        ];
        for col in dict_columns {
            builder = builder
                .set_column_dictionary_enabled(ColumnPath::new(vec![col.to_string()]), true);
        }

        // High-cardinality per-peak columns: plain encoding + compression.
        for col in [columns::MZ, columns::INTENSITY, columns::ION_MOBILITY] {
            builder = builder
                .set_column_dictionary_enabled(ColumnPath::new(vec![col.to_string()]), false);
        }

        builder.build()
    }
}

/// Point-in-time running counters, safe to read before close.
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    /// Spectra accepted so far.
    pub spectra_written: u64,
    /// Peak rows accepted so far.
    pub peaks_written: u64,
    /// Uncompressed logical bytes accepted so far.
    pub logical_bytes: u64,
}

impl fmt::Display for WriterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} spectra ({} peaks, ~{} logical bytes)",
            self.spectra_written, self.peaks_written, self.logical_bytes
        )
    }
}

/// Final statistics returned by a successful close.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Summary counters as persisted in the manifest.
    pub counts: StoreCounts,
    /// Row groups in the peaks table.
    pub row_groups_written: usize,
    /// Compressed size of the peaks table in bytes.
    pub peaks_file_bytes: u64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} spectra ({} peaks) in {} row groups, {} bytes",
            self.counts.num_spectra,
            self.counts.total_peaks,
            self.row_groups_written,
            self.peaks_file_bytes
        )
    }
}

/// What the flush thread reports after finishing the peaks table.
struct FlushSummary {
    row_groups: usize,
    file_bytes: u64,
}

/// Streaming writer for a peakrow bundle directory.
pub struct StoreWriter {
    root: PathBuf,
    assembler: BatchAssembler,
    sender: Option<Sender<RecordBatch>>,
    handle: Option<JoinHandle<Result<FlushSummary, String>>>,
    flush_error: Arc<Mutex<Option<String>>>,
    poisoned: bool,
    seen_ids: HashSet<i64>,
    stats: WriterStats,
    ms1_spectra: u64,
    ms2_spectra: u64,
    chromatograms: Vec<Chromatogram>,
    mobilograms: Vec<Mobilogram>,
}

impl StoreWriter {
    /// Create a new bundle at `path` and acquire it exclusively.
    ///
    /// Fails with [`WriterError::AlreadyExists`] if the path exists; a
    /// bundle is never overwritten in place.
    pub fn create<P: AsRef<Path>>(path: P, config: WriterConfig) -> Result<Self, WriterError> {
        let root = path.as_ref().to_path_buf();
        if root.exists() {
            return Err(WriterError::AlreadyExists(
                root.to_string_lossy().to_string(),
            ));
        }

        fs::create_dir_all(root.join("peaks"))?;
        fs::create_dir(root.join("chromatograms"))?;
        fs::create_dir(root.join("mobilograms"))?;

        let peaks_file = File::create(root.join(PEAKS_FILE))?;
        let schema = peaks_schema_arc();
        let props = config.to_writer_properties();

        let flush_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let (sender, receiver) = bounded::<RecordBatch>(config.flush_queue_capacity.max(1));

        let thread_schema = schema.clone();
        let thread_error = Arc::clone(&flush_error);
        let handle = thread::Builder::new()
            .name("peakrow-flush".to_string())
            .spawn(move || {
                let record = |e: String| {
                    let mut slot = thread_error.lock().unwrap_or_else(|p| p.into_inner());
                    slot.get_or_insert(e.clone());
                    e
                };

                let mut writer = match ArrowWriter::try_new(peaks_file, thread_schema, Some(props))
                {
                    Ok(writer) => writer,
                    Err(e) => return Err(record(e.to_string())),
                };

                // One sealed batch becomes exactly one row group; the
                // explicit flush keeps spectra from straddling groups.
                for batch in receiver {
                    if let Err(e) = writer.write(&batch).and_then(|_| writer.flush()) {
                        return Err(record(e.to_string()));
                    }
                }

                match writer.close() {
                    Ok(metadata) => Ok(FlushSummary {
                        row_groups: metadata.row_groups.len(),
                        file_bytes: metadata
                            .row_groups
                            .iter()
                            .map(|rg| rg.total_compressed_size.unwrap_or(0) as u64)
                            .sum(),
                    }),
                    Err(e) => Err(record(e.to_string())),
                }
            })
            .map_err(|e| WriterError::Flush(format!("failed to spawn flush thread: {e}")))?;

        Ok(Self {
            root,
            assembler: BatchAssembler::new(schema, config.batch_target_rows),
            sender: Some(sender),
            handle: Some(handle),
            flush_error,
            poisoned: false,
            seen_ids: HashSet::new(),
            stats: WriterStats::default(),
            ms1_spectra: 0,
            ms2_spectra: 0,
            chromatograms: Vec::new(),
            mobilograms: Vec::new(),
        })
    }

    /// Fail fast if the writer was closed or the flush thread errored.
    fn check_open(&mut self) -> Result<(), WriterError> {
        if self.poisoned || self.sender.is_none() {
            return Err(WriterError::Closed);
        }
        let pending = {
            let slot = self.flush_error.lock().unwrap_or_else(|p| p.into_inner());
            slot.clone()
        };
        if let Some(message) = pending {
            self.poisoned = true;
            return Err(WriterError::Flush(message));
        }
        Ok(())
    }

    /// Write a single spectrum.
    pub fn write_spectrum(&mut self, spectrum: &Spectrum) -> Result<(), WriterError> {
        self.check_open()?;
        spectrum.validate()?;
        if !self.seen_ids.insert(spectrum.spectrum_id) {
            return Err(ValidationError::DuplicateSpectrumId(spectrum.spectrum_id).into());
        }

        self.assembler.push(spectrum);
        self.stats.spectra_written += 1;
        self.stats.peaks_written += spectrum.peak_count() as u64;
        self.stats.logical_bytes += (spectrum.peak_count() * ROW_WIDTH_BYTES) as u64;
        match spectrum.ms_level {
            1 => self.ms1_spectra += 1,
            2 => self.ms2_spectra += 1,
            _ => {}
        }

        if self.assembler.should_seal() {
            self.flush_current_batch()?;
        }
        Ok(())
    }

    /// Write a slice of spectra.
    pub fn write_spectra(&mut self, spectra: &[Spectrum]) -> Result<(), WriterError> {
        for spectrum in spectra {
            self.write_spectrum(spectrum)?;
        }
        Ok(())
    }

    /// Vectorized ingestion from raw arrays, bypassing the builder.
    pub fn write_spectrum_arrays(&mut self, arrays: SpectrumArrays) -> Result<(), WriterError> {
        let spectrum = arrays.into_spectrum()?;
        self.write_spectrum(&spectrum)
    }

    /// Buffer a chromatogram; persisted once at close.
    pub fn write_chromatogram(&mut self, trace: Chromatogram) -> Result<(), WriterError> {
        self.check_open()?;
        self.chromatograms.push(trace);
        Ok(())
    }

    /// Buffer a mobilogram; persisted once at close.
    pub fn write_mobilogram(&mut self, trace: Mobilogram) -> Result<(), WriterError> {
        self.check_open()?;
        self.mobilograms.push(trace);
        Ok(())
    }

    /// Running counters; valid at any point before close.
    pub fn stats(&self) -> WriterStats {
        self.stats.clone()
    }

    /// Seal the in-progress batch and hand it to the flush thread.
    ///
    /// Blocks only while the flush queue is full.
    fn flush_current_batch(&mut self) -> Result<(), WriterError> {
        let Some(batch) = self.assembler.seal()? else {
            return Ok(());
        };
        let sender = self.sender.as_ref().ok_or(WriterError::Closed)?;
        if sender.send(batch).is_err() {
            self.poisoned = true;
            let message = {
                let slot = self.flush_error.lock().unwrap_or_else(|p| p.into_inner());
                slot.clone()
            };
            return Err(WriterError::Flush(
                message.unwrap_or_else(|| "flush thread exited unexpectedly".to_string()),
            ));
        }
        Ok(())
    }

    /// Flush pending batches, finalize every column group, write the
    /// manifest, and release the bundle.
    ///
    /// The manifest is written last: a bundle that never reached a clean
    /// close has no manifest and is rejected by the reader.
    pub fn close(mut self) -> Result<StoreStats, WriterError> {
        self.check_open()?;
        self.flush_current_batch()?;

        // Dropping the sender lets the flush thread drain and finish.
        self.sender.take();
        let handle = self.handle.take().ok_or(WriterError::Closed)?;
        let summary = match handle.join() {
            Ok(Ok(summary)) => summary,
            Ok(Err(message)) => return Err(WriterError::Flush(message)),
            Err(_) => return Err(WriterError::Flush("flush thread panicked".to_string())),
        };

        traces::write_chromatograms(&self.root.join(CHROMATOGRAMS_FILE), &self.chromatograms)?;
        traces::write_mobilograms(&self.root.join(MOBILOGRAMS_FILE), &self.mobilograms)?;

        let counts = StoreCounts {
            num_spectra: self.stats.spectra_written,
            total_peaks: self.stats.peaks_written,
            ms1_spectra: self.ms1_spectra,
            ms2_spectra: self.ms2_spectra,
            num_chromatograms: self.chromatograms.len() as u64,
            num_mobilograms: self.mobilograms.len() as u64,
        };
        Manifest::new(counts.clone()).store(&self.root.join(MANIFEST_FILE))?;

        log::info!(
            "closed bundle {}: {} spectra, {} peaks, {} row groups",
            self.root.display(),
            counts.num_spectra,
            counts.total_peaks,
            summary.row_groups
        );

        Ok(StoreStats {
            counts,
            row_groups_written: summary.row_groups,
            peaks_file_bytes: summary.file_bytes,
        })
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        // Disconnect and join so the flush thread never outlives the
        // writer; without a manifest the bundle stays unreadable.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if !self.poisoned {
                log::warn!(
                    "StoreWriter for {} dropped without close(); bundle left without manifest",
                    self.root.display()
                );
            }
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SpectrumBuilder;

    fn spectrum(id: i64, ms_level: i16, n_peaks: usize) -> Spectrum {
        let mut builder = SpectrumBuilder::new(id, id)
            .ms_level(ms_level)
            .retention_time(id as f64 * 10.0)
            .polarity(1);
        if ms_level >= 2 {
            builder = builder.precursor(500.0, Some(2), None);
        }
        for i in 0..n_peaks {
            builder = builder.add_peak(100.0 + i as f64, 1000.0);
        }
        builder.build().expect("valid spectrum")
    }

    #[test]
    fn create_rejects_existing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        std::fs::create_dir(&path).expect("mkdir");
        assert!(matches!(
            StoreWriter::create(&path, WriterConfig::default()),
            Err(WriterError::AlreadyExists(_))
        ));
    }

    #[test]
    fn stats_track_running_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            StoreWriter::create(dir.path().join("store"), WriterConfig::default()).expect("create");

        writer.write_spectrum(&spectrum(0, 1, 2)).expect("write");
        writer.write_spectrum(&spectrum(1, 2, 1)).expect("write");

        let stats = writer.stats();
        assert_eq!(stats.spectra_written, 2);
        assert_eq!(stats.peaks_written, 3);
        assert!(stats.logical_bytes > 0);

        let closed = writer.close().expect("close");
        assert_eq!(closed.counts.ms1_spectra, 1);
        assert_eq!(closed.counts.ms2_spectra, 1);
    }

    #[test]
    fn duplicate_spectrum_id_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            StoreWriter::create(dir.path().join("store"), WriterConfig::default()).expect("create");

        writer.write_spectrum(&spectrum(7, 1, 1)).expect("write");
        let err = writer.write_spectrum(&spectrum(7, 1, 1)).unwrap_err();
        assert!(matches!(
            err,
            WriterError::Validation(ValidationError::DuplicateSpectrumId(7))
        ));
    }

    #[test]
    fn manifest_written_only_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        {
            let mut writer =
                StoreWriter::create(&path, WriterConfig::default()).expect("create");
            writer.write_spectrum(&spectrum(0, 1, 1)).expect("write");
            assert!(!path.join(MANIFEST_FILE).exists());
            // dropped without close
        }
        assert!(!path.join(MANIFEST_FILE).exists());

        let path2 = dir.path().join("store2");
        let mut writer = StoreWriter::create(&path2, WriterConfig::default()).expect("create");
        writer.write_spectrum(&spectrum(0, 1, 1)).expect("write");
        writer.close().expect("close");
        assert!(path2.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn small_batch_target_seals_many_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = WriterConfig {
            batch_target_rows: 2,
            ..WriterConfig::default()
        };
        let mut writer = StoreWriter::create(dir.path().join("store"), config).expect("create");
        for id in 0..10 {
            writer.write_spectrum(&spectrum(id, 1, 3)).expect("write");
        }
        let stats = writer.close().expect("close");
        assert_eq!(stats.counts.total_peaks, 30);
        assert!(stats.row_groups_written >= 1);
    }
}

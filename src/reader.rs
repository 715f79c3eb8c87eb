//! Store reader.
//!
//! [`StoreReader`] opens a closed bundle and serves queries over it:
//!
//! - `summary()` answers from the manifest alone, never touching data.
//! - `get_spectrum(id)` and the filter queries prune whole row groups
//!   using the Parquet chunk statistics the writer persisted, decoding
//!   only groups whose min/max can contain a match.
//! - `iter_spectra()` walks the store lazily, one record batch resident.
//! - [`StoreReader::peak_columns`] exposes the decoded columns of one
//!   row group as borrowed slices over the reader's batch cache: no
//!   allocation, no ownership transfer, lifetime tied to the reader
//!   borrow.
//!
//! A bundle without a manifest (a writer that never reached a clean
//! close) or with a mismatched schema is rejected on open with
//! [`ReaderError::CorruptStore`]. The store is immutable after close, so
//! any number of readers may open it concurrently; each keeps its own
//! decoded-batch cache.
//!
//! Spectra with zero peaks occupy no rows in the long-format table: they
//! are visible in the summary counters but yield nothing on iteration.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int16Array, Int64Array, Int8Array,
};
use arrow::buffer::BooleanBuffer;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::parquet_to_arrow_schema;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::statistics::Statistics;

use crate::manifest::Manifest;
use crate::schema::{
    self, columns, validate_peaks_schema, CHROMATOGRAMS_FILE, MANIFEST_FILE, MOBILOGRAMS_FILE,
    PEAKS_FILE,
};
use crate::spectrum::{IonMobility, PeakArrays, Precursor, Spectrum};
use crate::traces::{self, Chromatogram, Mobilogram, TraceError};

/// Errors that can occur while reading a bundle.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow decode failed.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet decode failed.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Reading a trace column group failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Missing manifest, missing peaks table, or schema mismatch.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// Random access by an id the store does not contain.
    #[error("spectrum {0} not found")]
    NotFound(i64),

    /// A row-group index past the end of the peaks table.
    #[error("row group {index} out of range: store has {count}")]
    RowGroupOutOfRange {
        /// Index requested.
        index: usize,
        /// Row groups in the store.
        count: usize,
    },
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Rows per record batch for sequential iteration.
    pub batch_size: usize,
    /// Decoded row groups the reader keeps resident.
    pub batch_cache_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 65_536,
            batch_cache_capacity: 4,
        }
    }
}

/// Store-wide summary, derived entirely from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    /// Total spectra, including empty ones.
    pub num_spectra: u64,
    /// Total peak rows.
    pub total_peaks: u64,
    /// Spectra with ms_level == 1.
    pub ms1_spectra: u64,
    /// Spectra with ms_level == 2.
    pub ms2_spectra: u64,
    /// Chromatogram traces.
    pub num_chromatograms: u64,
    /// Mobilogram traces.
    pub num_mobilograms: u64,
    /// Bundle format version.
    pub format_version: String,
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "peakrow bundle (format {})", self.format_version)?;
        writeln!(f, "  spectra: {}", self.num_spectra)?;
        writeln!(f, "    MS1: {}", self.ms1_spectra)?;
        writeln!(f, "    MS2: {}", self.ms2_spectra)?;
        writeln!(f, "  peaks: {}", self.total_peaks)?;
        writeln!(f, "  chromatograms: {}", self.num_chromatograms)?;
        writeln!(f, "  mobilograms: {}", self.num_mobilograms)?;
        Ok(())
    }
}

/// Zero-copy view over one decoded row group's peak columns.
///
/// Every slice aliases the reader's cached batch; nothing is allocated
/// or copied, and the view cannot outlive the reader borrow it came
/// from. `ion_mobility` is dense — consult `mobility_valid` before
/// trusting a slot.
pub struct PeakColumns<'a> {
    /// Spectrum id of each row.
    pub spectrum_id: &'a [i64],
    /// MS level of each row.
    pub ms_level: &'a [i16],
    /// Retention time of each row, in seconds.
    pub retention_time: &'a [f64],
    /// Mass-to-charge values.
    pub mz: &'a [f64],
    /// Intensity values.
    pub intensity: &'a [f32],
    /// Dense ion mobility values, placeholders included.
    pub ion_mobility: &'a [f64],
    /// Bit mask marking which mobility slots are meaningful.
    pub mobility_valid: &'a BooleanBuffer,
}

impl<'a> PeakColumns<'a> {
    /// Number of peak rows in the view.
    pub fn len(&self) -> usize {
        self.mz.len()
    }

    /// True when the row group holds no rows.
    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }
}

/// Small FIFO cache of decoded row groups.
struct BatchCache {
    capacity: usize,
    order: VecDeque<usize>,
    entries: HashMap<usize, RecordBatch>,
}

impl BatchCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get_or_load(
        &mut self,
        key: usize,
        load: impl FnOnce() -> Result<RecordBatch, ReaderError>,
    ) -> Result<&RecordBatch, ReaderError> {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let batch = load()?;
                self.order.push_back(key);
                Ok(entry.insert(batch))
            }
        }
    }
}

/// Reader over a closed peakrow bundle.
pub struct StoreReader {
    root: PathBuf,
    config: ReaderConfig,
    manifest: Manifest,
    metadata: Arc<ParquetMetaData>,
    cache: BatchCache,
}

impl StoreReader {
    /// Open a bundle with default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        Self::open_with_config(path, ReaderConfig::default())
    }

    /// Open a bundle, validating its manifest and peaks schema.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: ReaderConfig,
    ) -> Result<Self, ReaderError> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ReaderError::CorruptStore(format!(
                "not a bundle directory: {}",
                root.display()
            )));
        }

        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(ReaderError::CorruptStore(format!(
                "missing {MANIFEST_FILE}: store was not closed cleanly"
            )));
        }
        let manifest = Manifest::load(&manifest_path)
            .map_err(|e| ReaderError::CorruptStore(format!("unreadable manifest: {e}")))?;
        if manifest.format_version != schema::FORMAT_VERSION {
            return Err(ReaderError::CorruptStore(format!(
                "format version mismatch: bundle is {}, reader expects {}",
                manifest.format_version,
                schema::FORMAT_VERSION
            )));
        }

        let peaks_path = root.join(PEAKS_FILE);
        let file = File::open(&peaks_path).map_err(|e| {
            ReaderError::CorruptStore(format!("missing peaks table {PEAKS_FILE}: {e}"))
        })?;
        let parquet_reader = SerializedFileReader::new(file)?;
        let metadata = Arc::new(parquet_reader.metadata().clone());

        let file_meta = metadata.file_metadata();
        let arrow_schema =
            parquet_to_arrow_schema(file_meta.schema_descr(), file_meta.key_value_metadata())?;
        validate_peaks_schema(&arrow_schema)
            .map_err(|e| ReaderError::CorruptStore(e.to_string()))?;

        let cache = BatchCache::new(config.batch_cache_capacity);
        Ok(Self {
            root,
            config,
            manifest,
            metadata,
            cache,
        })
    }

    /// The parsed bundle manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Summary counters; O(1), never triggers a data scan.
    pub fn summary(&self) -> StoreSummary {
        let counts = &self.manifest.counts;
        StoreSummary {
            num_spectra: counts.num_spectra,
            total_peaks: counts.total_peaks,
            ms1_spectra: counts.ms1_spectra,
            ms2_spectra: counts.ms2_spectra,
            num_chromatograms: counts.num_chromatograms,
            num_mobilograms: counts.num_mobilograms,
            format_version: self.manifest.format_version.clone(),
        }
    }

    /// Number of row groups in the peaks table.
    pub fn num_row_groups(&self) -> usize {
        self.metadata.num_row_groups()
    }

    fn peaks_path(&self) -> PathBuf {
        self.root.join(PEAKS_FILE)
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.metadata
            .file_metadata()
            .schema_descr()
            .columns()
            .iter()
            .position(|c| c.name() == name)
    }

    fn i64_stats(&self, row_group: usize, column: usize) -> Option<(i64, i64)> {
        match self.metadata.row_group(row_group).column(column).statistics() {
            Some(Statistics::Int64(s)) => Some((*s.min_opt()?, *s.max_opt()?)),
            _ => None,
        }
    }

    fn i32_stats(&self, row_group: usize, column: usize) -> Option<(i32, i32)> {
        match self.metadata.row_group(row_group).column(column).statistics() {
            Some(Statistics::Int32(s)) => Some((*s.min_opt()?, *s.max_opt()?)),
            _ => None,
        }
    }

    fn f64_stats(&self, row_group: usize, column: usize) -> Option<(f64, f64)> {
        match self.metadata.row_group(row_group).column(column).statistics() {
            Some(Statistics::Double(s)) => Some((*s.min_opt()?, *s.max_opt()?)),
            _ => None,
        }
    }

    /// Row groups whose `spectrum_id` statistics can contain `id`.
    /// Groups without statistics are never skipped.
    fn candidate_groups_for_id(&self, id: i64) -> Vec<usize> {
        let Some(column) = self.column_index(columns::SPECTRUM_ID) else {
            return (0..self.num_row_groups()).collect();
        };
        (0..self.num_row_groups())
            .filter(|&rg| match self.i64_stats(rg, column) {
                Some((min, max)) => min <= id && id <= max,
                None => true,
            })
            .collect()
    }

    fn candidate_groups_for_ms_level(&self, level: i16) -> Vec<usize> {
        let Some(column) = self.column_index(columns::MS_LEVEL) else {
            return (0..self.num_row_groups()).collect();
        };
        (0..self.num_row_groups())
            .filter(|&rg| match self.i32_stats(rg, column) {
                Some((min, max)) => min <= level as i32 && level as i32 <= max,
                None => true,
            })
            .collect()
    }

    fn candidate_groups_for_rt(&self, lo: f64, hi: f64) -> Vec<usize> {
        let Some(column) = self.column_index(columns::RETENTION_TIME) else {
            return (0..self.num_row_groups()).collect();
        };
        (0..self.num_row_groups())
            .filter(|&rg| match self.f64_stats(rg, column) {
                Some((min, max)) => min <= hi && lo <= max,
                None => true,
            })
            .collect()
    }

    /// Decode one row group, going through the batch cache.
    fn decoded_batch(&mut self, row_group: usize) -> Result<&RecordBatch, ReaderError> {
        let count = self.num_row_groups();
        if row_group >= count {
            return Err(ReaderError::RowGroupOutOfRange {
                index: row_group,
                count,
            });
        }
        let path = self.peaks_path();
        let rows = self.metadata.row_group(row_group).num_rows() as usize;
        self.cache
            .get_or_load(row_group, || load_row_group(&path, row_group, rows))
    }

    /// Random access by spectrum id.
    ///
    /// Resolves the owning row group through the persisted statistics,
    /// decodes only that group, and reconstructs the spectrum. Fails
    /// with [`ReaderError::NotFound`] for an unknown id.
    pub fn get_spectrum(&mut self, spectrum_id: i64) -> Result<Spectrum, ReaderError> {
        for rg in self.candidate_groups_for_id(spectrum_id) {
            let batch = self.decoded_batch(rg)?;
            if let Some(spectrum) = spectrum_from_rows(batch, spectrum_id)? {
                return Ok(spectrum);
            }
        }
        Err(ReaderError::NotFound(spectrum_id))
    }

    /// All spectra with the given MS level, in persisted order.
    ///
    /// Row groups whose `ms_level` range cannot contain `level` are
    /// skipped without decoding; the result is independent of the batch
    /// size the store was written with.
    pub fn spectra_by_ms_level(&mut self, level: i16) -> Result<Vec<Spectrum>, ReaderError> {
        let mut matches = Vec::new();
        for rg in self.candidate_groups_for_ms_level(level) {
            let batch = self.decoded_batch(rg)?;
            for spectrum in spectra_from_batch(batch)? {
                if spectrum.ms_level == level {
                    matches.push(finalize(spectrum));
                }
            }
        }
        Ok(matches)
    }

    /// All spectra whose retention time falls in `[lo, hi]`, inclusive.
    pub fn spectra_by_rt_range(&mut self, lo: f64, hi: f64) -> Result<Vec<Spectrum>, ReaderError> {
        let mut matches = Vec::new();
        for rg in self.candidate_groups_for_rt(lo, hi) {
            let batch = self.decoded_batch(rg)?;
            for spectrum in spectra_from_batch(batch)? {
                if spectrum.retention_time >= lo && spectrum.retention_time <= hi {
                    matches.push(finalize(spectrum));
                }
            }
        }
        Ok(matches)
    }

    /// Lazy iteration over every spectrum in persisted order.
    ///
    /// Decodes one record batch at a time; re-opening the store (or
    /// calling this again) yields a fresh sequence from the start.
    pub fn iter_spectra(&self) -> Result<SpectrumIter, ReaderError> {
        let file = File::open(self.peaks_path())?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(self.config.batch_size)
            .build()?;
        Ok(SpectrumIter {
            batches: Some(reader),
            ready: VecDeque::new(),
            partial: None,
        })
    }

    /// Zero-copy view of one decoded row group's peak columns.
    ///
    /// The slices borrow the reader's cached batch directly; they stay
    /// valid until the reader is next used mutably (which may evict the
    /// batch) and never allocate.
    pub fn peak_columns(&mut self, row_group: usize) -> Result<PeakColumns<'_>, ReaderError> {
        let batch = self.decoded_batch(row_group)?;
        Ok(PeakColumns {
            spectrum_id: typed_column::<Int64Array>(batch, columns::SPECTRUM_ID)?.values(),
            ms_level: typed_column::<Int16Array>(batch, columns::MS_LEVEL)?.values(),
            retention_time: typed_column::<Float64Array>(batch, columns::RETENTION_TIME)?.values(),
            mz: typed_column::<Float64Array>(batch, columns::MZ)?.values(),
            intensity: typed_column::<Float32Array>(batch, columns::INTENSITY)?.values(),
            ion_mobility: typed_column::<Float64Array>(batch, columns::ION_MOBILITY)?.values(),
            mobility_valid: typed_column::<BooleanArray>(batch, columns::ION_MOBILITY_VALID)?
                .values(),
        })
    }

    /// Bulk-decode every chromatogram; empty when the store has none.
    pub fn read_chromatograms(&self) -> Result<Vec<Chromatogram>, ReaderError> {
        Ok(traces::read_chromatograms(&self.root.join(CHROMATOGRAMS_FILE))?)
    }

    /// Bulk-decode every mobilogram; empty when the store has none.
    pub fn read_mobilograms(&self) -> Result<Vec<Mobilogram>, ReaderError> {
        Ok(traces::read_mobilograms(&self.root.join(MOBILOGRAMS_FILE))?)
    }
}

/// Lazy spectrum iterator; one decoded batch resident at a time.
///
/// Record batch boundaries are row-based and may split a spectrum, so a
/// trailing partial group is carried over into the next batch.
pub struct SpectrumIter {
    batches: Option<ParquetRecordBatchReader>,
    ready: VecDeque<Spectrum>,
    partial: Option<Spectrum>,
}

impl Iterator for SpectrumIter {
    type Item = Result<Spectrum, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(spectrum) = self.ready.pop_front() {
                return Some(Ok(finalize(spectrum)));
            }

            let reader = self.batches.as_mut()?;
            match reader.next() {
                Some(Ok(batch)) => {
                    let mut groups = match spectra_from_batch(&batch) {
                        Ok(groups) => groups,
                        Err(e) => {
                            self.batches = None;
                            return Some(Err(e));
                        }
                    };

                    if let Some(mut pending) = self.partial.take() {
                        if let Some(first) = groups.first() {
                            if first.spectrum_id == pending.spectrum_id {
                                let first = groups.remove(0);
                                extend_spectrum(&mut pending, first);
                            }
                        }
                        if groups.is_empty() {
                            // batch continued the pending spectrum only
                            self.partial = Some(pending);
                            continue;
                        }
                        self.ready.push_back(pending);
                    }

                    // the last group may continue into the next batch
                    self.partial = groups.pop();
                    self.ready.extend(groups);
                }
                Some(Err(e)) => {
                    self.batches = None;
                    return Some(Err(e.into()));
                }
                None => {
                    self.batches = None;
                    return self.partial.take().map(|s| Ok(finalize(s)));
                }
            }
        }
    }
}

fn load_row_group(path: &Path, row_group: usize, rows: usize) -> Result<RecordBatch, ReaderError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_row_groups(vec![row_group])
        .with_batch_size(rows.max(1))
        .build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    match batches.len() {
        0 => Err(ReaderError::CorruptStore(format!(
            "row group {row_group} decoded to no batches"
        ))),
        1 => Ok(batches.remove(0)),
        _ => {
            let schema = batches[0].schema();
            Ok(arrow::compute::concat_batches(&schema, &batches)?)
        }
    }
}

fn typed_column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a A, ReaderError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ReaderError::CorruptStore(format!("missing column {name}")))?
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| ReaderError::CorruptStore(format!("unexpected type for column {name}")))
}

fn opt_f64(array: &Float64Array, row: usize) -> Option<f64> {
    array.is_valid(row).then(|| array.value(row))
}

fn opt_f32(array: &Float32Array, row: usize) -> Option<f32> {
    array.is_valid(row).then(|| array.value(row))
}

fn opt_i16(array: &Int16Array, row: usize) -> Option<i16> {
    array.is_valid(row).then(|| array.value(row))
}

struct PeakTable<'a> {
    spectrum_id: &'a Int64Array,
    spectrum_index: &'a Int64Array,
    ms_level: &'a Int16Array,
    retention_time: &'a Float64Array,
    polarity: &'a Int8Array,
    mz: &'a Float64Array,
    intensity: &'a Float32Array,
    ion_mobility: &'a Float64Array,
    ion_mobility_valid: &'a BooleanArray,
    precursor_mz: &'a Float64Array,
    precursor_charge: &'a Int16Array,
    precursor_intensity: &'a Float32Array,
    collision_energy: &'a Float32Array,
}

impl<'a> PeakTable<'a> {
    fn bind(batch: &'a RecordBatch) -> Result<Self, ReaderError> {
        Ok(Self {
            spectrum_id: typed_column(batch, columns::SPECTRUM_ID)?,
            spectrum_index: typed_column(batch, columns::SPECTRUM_INDEX)?,
            ms_level: typed_column(batch, columns::MS_LEVEL)?,
            retention_time: typed_column(batch, columns::RETENTION_TIME)?,
            polarity: typed_column(batch, columns::POLARITY)?,
            mz: typed_column(batch, columns::MZ)?,
            intensity: typed_column(batch, columns::INTENSITY)?,
            ion_mobility: typed_column(batch, columns::ION_MOBILITY)?,
            ion_mobility_valid: typed_column(batch, columns::ION_MOBILITY_VALID)?,
            precursor_mz: typed_column(batch, columns::PRECURSOR_MZ)?,
            precursor_charge: typed_column(batch, columns::PRECURSOR_CHARGE)?,
            precursor_intensity: typed_column(batch, columns::PRECURSOR_INTENSITY)?,
            collision_energy: typed_column(batch, columns::COLLISION_ENERGY)?,
        })
    }

    /// Start a spectrum from the metadata columns of row `row`.
    fn open_spectrum(&self, row: usize) -> Spectrum {
        let precursor = opt_f64(self.precursor_mz, row).map(|mz| Precursor {
            mz,
            charge: opt_i16(self.precursor_charge, row),
            intensity: opt_f32(self.precursor_intensity, row),
            collision_energy: opt_f32(self.collision_energy, row),
        });

        Spectrum {
            spectrum_id: self.spectrum_id.value(row),
            spectrum_index: self.spectrum_index.value(row),
            ms_level: self.ms_level.value(row),
            retention_time: self.retention_time.value(row),
            polarity: self.polarity.value(row),
            precursor,
            peaks: PeakArrays {
                mz: Vec::new(),
                intensity: Vec::new(),
                // dense during reconstruction; collapsed by finalize()
                ion_mobility: Some(IonMobility {
                    values: Vec::new(),
                    validity: Vec::new(),
                }),
            },
        }
    }

    fn push_peak(&self, spectrum: &mut Spectrum, row: usize) {
        spectrum.peaks.mz.push(self.mz.value(row));
        spectrum.peaks.intensity.push(self.intensity.value(row));
        if let Some(mobility) = spectrum.peaks.ion_mobility.as_mut() {
            mobility.values.push(self.ion_mobility.value(row));
            mobility.validity.push(self.ion_mobility_valid.value(row));
        }
    }
}

/// Group a batch's rows into spectra in row order. Mobility stays dense
/// here; callers collapse it via [`finalize`] before handing spectra out.
fn spectra_from_batch(batch: &RecordBatch) -> Result<Vec<Spectrum>, ReaderError> {
    let table = PeakTable::bind(batch)?;
    let mut spectra: Vec<Spectrum> = Vec::new();

    for row in 0..batch.num_rows() {
        let id = table.spectrum_id.value(row);
        let start_new = spectra
            .last()
            .map(|s: &Spectrum| s.spectrum_id != id)
            .unwrap_or(true);
        if start_new {
            spectra.push(table.open_spectrum(row));
        }
        if let Some(current) = spectra.last_mut() {
            table.push_peak(current, row);
        }
    }

    Ok(spectra)
}

/// Reconstruct a single spectrum's rows from a decoded row group.
fn spectrum_from_rows(
    batch: &RecordBatch,
    spectrum_id: i64,
) -> Result<Option<Spectrum>, ReaderError> {
    let table = PeakTable::bind(batch)?;

    let mut spectrum: Option<Spectrum> = None;
    for row in 0..batch.num_rows() {
        if table.spectrum_id.value(row) != spectrum_id {
            // a spectrum's rows are contiguous; stop at the end of the run
            if spectrum.is_some() {
                break;
            }
            continue;
        }
        let current = spectrum.get_or_insert_with(|| table.open_spectrum(row));
        table.push_peak(current, row);
    }

    Ok(spectrum.map(finalize))
}

/// Append `tail`'s peak rows onto `head` (same spectrum split across
/// record batches).
fn extend_spectrum(head: &mut Spectrum, tail: Spectrum) {
    head.peaks.mz.extend(tail.peaks.mz);
    head.peaks.intensity.extend(tail.peaks.intensity);
    if let (Some(head_mob), Some(tail_mob)) =
        (head.peaks.ion_mobility.as_mut(), tail.peaks.ion_mobility)
    {
        head_mob.values.extend(tail_mob.values);
        head_mob.validity.extend(tail_mob.validity);
    }
}

/// Collapse an all-invalid mobility column back to `None`: a spectrum
/// written without a mobility dimension reads back without one.
fn finalize(mut spectrum: Spectrum) -> Spectrum {
    let drop_mobility = spectrum
        .peaks
        .ion_mobility
        .as_ref()
        .map(|m| !m.validity.iter().any(|&v| v))
        .unwrap_or(false);
    if drop_mobility {
        spectrum.peaks.ion_mobility = None;
    }
    spectrum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SpectrumBuilder;
    use crate::writer::{StoreWriter, WriterConfig};

    fn write_store(path: &Path, n: i64) {
        let mut writer = StoreWriter::create(path, WriterConfig::default()).expect("create");
        for id in 0..n {
            let spectrum = SpectrumBuilder::new(id, id)
                .ms_level(1)
                .retention_time(id as f64 * 10.0)
                .polarity(1)
                .add_peak(400.0 + id as f64, 1000.0)
                .build()
                .expect("valid spectrum");
            writer.write_spectrum(&spectrum).expect("write");
        }
        writer.close().expect("close");
    }

    #[test]
    fn open_rejects_missing_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        std::fs::create_dir_all(path.join("peaks")).expect("mkdir");

        assert!(matches!(
            StoreReader::open(&path),
            Err(ReaderError::CorruptStore(_))
        ));
    }

    #[test]
    fn summary_comes_from_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        write_store(&path, 5);

        let reader = StoreReader::open(&path).expect("open");
        let summary = reader.summary();
        assert_eq!(summary.num_spectra, 5);
        assert_eq!(summary.total_peaks, 5);
        assert_eq!(summary.ms1_spectra, 5);
    }

    #[test]
    fn get_spectrum_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        write_store(&path, 10);

        let mut reader = StoreReader::open(&path).expect("open");
        let spectrum = reader.get_spectrum(7).expect("found");
        assert_eq!(spectrum.spectrum_id, 7);
        assert_eq!(spectrum.retention_time, 70.0);
        assert_eq!(spectrum.peaks.mz, vec![407.0]);

        assert!(matches!(
            reader.get_spectrum(99),
            Err(ReaderError::NotFound(99))
        ));
    }

    #[test]
    fn iterator_is_restartable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");
        write_store(&path, 4);

        let reader = StoreReader::open(&path).expect("open");
        let first: Vec<i64> = reader
            .iter_spectra()
            .expect("iter")
            .map(|s| s.expect("spectrum").spectrum_id)
            .collect();
        let second: Vec<i64> = reader
            .iter_spectra()
            .expect("iter")
            .map(|s| s.expect("spectrum").spectrum_id)
            .collect();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(first, second);
    }

    #[test]
    fn iterator_merges_spectra_split_across_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store");

        let mut writer = StoreWriter::create(&path, WriterConfig::default()).expect("create");
        let mut builder = SpectrumBuilder::new(0, 0).ms_level(1);
        for i in 0..10 {
            builder = builder.add_peak(100.0 + i as f64, 1.0);
        }
        writer
            .write_spectrum(&builder.build().expect("valid"))
            .expect("write");
        writer.close().expect("close");

        // batch_size smaller than the spectrum forces a split
        let config = ReaderConfig {
            batch_size: 3,
            ..ReaderConfig::default()
        };
        let reader = StoreReader::open_with_config(&path, config).expect("open");
        let spectra: Vec<Spectrum> = reader
            .iter_spectra()
            .expect("iter")
            .collect::<Result<_, _>>()
            .expect("spectra");
        assert_eq!(spectra.len(), 1);
        assert_eq!(spectra[0].peak_count(), 10);
    }
}

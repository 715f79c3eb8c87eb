//! Bundle manifest.
//!
//! `manifest.json` is the commit record of a bundle: the writer creates
//! it only after every Parquet footer has been written, so its presence
//! is the reader's proof that the store was closed cleanly. It also
//! carries the summary counters, which lets [`crate::reader::StoreReader::summary`]
//! answer without scanning any data.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::FORMAT_VERSION;

/// Summary counters persisted in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Total spectra written, including empty ones.
    pub num_spectra: u64,
    /// Total peak rows written.
    pub total_peaks: u64,
    /// Spectra with ms_level == 1.
    pub ms1_spectra: u64,
    /// Spectra with ms_level == 2.
    pub ms2_spectra: u64,
    /// Chromatogram traces written.
    pub num_chromatograms: u64,
    /// Mobilogram traces written.
    pub num_mobilograms: u64,
}

/// The `manifest.json` record at the root of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Bundle format version.
    pub format_version: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Summary counters.
    pub counts: StoreCounts,
}

impl Manifest {
    /// Build a manifest stamped with the current time.
    pub fn new(counts: StoreCounts) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            counts,
        }
    }

    /// Serialize to `path`, pretty-printed for quick inspection.
    pub fn store(&self, path: &Path) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load and parse a manifest from `path`.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let file = File::open(path)?;
        let manifest = serde_json::from_reader(BufReader::new(file))?;
        Ok(manifest)
    }
}

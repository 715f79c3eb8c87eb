//! # peakrow — columnar mass spectrometry peak storage
//!
//! `peakrow` converts instrument output (mzML: XML with base64 binary
//! peak arrays) into a compact, randomly-queryable columnar bundle built
//! on Apache Parquet, and serves it back through a builder/writer/reader
//! API.
//!
//! ## Bundle layout
//!
//! ```text
//! run.peakrow/
//! ├── peaks/peaks.parquet              # one row per peak, long format
//! ├── chromatograms/chromatograms.parquet
//! ├── mobilograms/mobilograms.parquet
//! └── manifest.json                    # written last on a clean close
//! ```
//!
//! The peaks table stores every peak as its own row with spectrum-level
//! metadata repeated; Parquet's dictionary + RLE encodings compress the
//! repeats away while keeping every column filter-pushdown friendly. Any
//! Parquet-speaking tool (DuckDB, polars, pandas) can query the bundle
//! directly:
//!
//! ```sql
//! SELECT * FROM read_parquet('run.peakrow/peaks/peaks.parquet')
//! WHERE ms_level = 2 AND precursor_mz BETWEEN 500 AND 600;
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use peakrow::builder::SpectrumBuilder;
//! use peakrow::writer::{StoreWriter, WriterConfig};
//!
//! let mut writer = StoreWriter::create("run.peakrow", WriterConfig::default())?;
//!
//! let spectrum = SpectrumBuilder::new(0, 0)
//!     .ms_level(1)
//!     .retention_time(60.0)
//!     .polarity(1)
//!     .add_peak(400.0, 10_000.0)
//!     .add_peak(500.0, 20_000.0)
//!     .build()?;
//!
//! writer.write_spectrum(&spectrum)?;
//! let stats = writer.close()?;
//! println!("wrote {} peaks", stats.counts.total_peaks);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Reading
//!
//! ```rust,no_run
//! use peakrow::reader::StoreReader;
//!
//! let mut reader = StoreReader::open("run.peakrow")?;
//! println!("{}", reader.summary());
//!
//! let spectrum = reader.get_spectrum(0)?;
//! for s in reader.iter_spectra()? {
//!     let s = s?;
//!     println!("spectrum {}: {} peaks", s.spectrum_id, s.peak_count());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Converting mzML
//!
//! With the default `mzml` feature:
//!
//! ```rust,no_run
//! let stats = peakrow::mzml::convert("run.mzML", "run.peakrow")?;
//! println!("{} spectra, {} skipped", stats.spectra_count, stats.skipped_records);
//! # Ok::<(), peakrow::mzml::ConvertError>(())
//! ```
//!
//! Conversion streams the source one scan record at a time; memory stays
//! bounded by the largest single scan regardless of file size.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod batch;
pub mod builder;
pub mod manifest;
#[cfg(feature = "mzml")]
pub mod mzml;
pub mod reader;
pub mod schema;
pub mod spectrum;
pub mod traces;
pub mod writer;

/// Re-exports of the commonly used types.
pub mod prelude {
    pub use crate::builder::SpectrumBuilder;
    pub use crate::manifest::{Manifest, StoreCounts};
    pub use crate::reader::{
        PeakColumns, ReaderConfig, ReaderError, SpectrumIter, StoreReader, StoreSummary,
    };
    pub use crate::schema::{peaks_schema, validate_peaks_schema, FORMAT_VERSION};
    pub use crate::spectrum::{
        IonMobility, PeakArrays, Precursor, Spectrum, SpectrumArrays, ValidationError,
    };
    pub use crate::traces::{Chromatogram, Mobilogram, TraceError};
    pub use crate::writer::{
        CompressionType, StoreStats, StoreWriter, WriterConfig, WriterError, WriterStats,
    };

    #[cfg(feature = "mzml")]
    pub use crate::mzml::{convert, ConvertConfig, ConvertError, ConvertStats, MzmlConverter};
}

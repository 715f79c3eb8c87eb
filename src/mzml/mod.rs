//! Streaming mzML ingestion.
//!
//! mzML wraps peak data in XML with base64-encoded (optionally
//! zlib-compressed) binary arrays. This module converts such files into
//! peakrow bundles without ever materializing the document: a pull-based
//! cursor reads one scan record at a time, decodes its arrays, and feeds
//! the store writer, so memory stays bounded by the largest single scan.
//!
//! Failure policy: a malformed scan record is logged, counted, and
//! skipped; an unparsable document aborts the conversion.

mod binary;
mod convert;
mod model;
mod streamer;

pub use binary::{decode_binary_array, BinaryDecodeError, Precision, SourceCompression};
pub use convert::{convert, ConvertConfig, ConvertError, ConvertStats, MzmlConverter};
pub use model::{RawChromatogram, RawPrecursor, RawSpectrum};
pub use streamer::{MzmlError, MzmlStreamer};

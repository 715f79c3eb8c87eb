//! Pull-based mzML cursor.
//!
//! [`MzmlStreamer`] walks the document event-by-event with `quick-xml`,
//! materializing one [`RawSpectrum`] (or [`RawChromatogram`]) at a time.
//! Per-record decode state lives on the stack of the parse call; nothing
//! document-sized is ever built.
//!
//! Error granularity matters here: a record whose binary payload fails
//! to decode leaves the cursor positioned after the record, so the error
//! is recoverable and the converter can skip-and-count. Structural XML
//! problems are not recoverable and abort the stream.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::binary::{decode_binary_array, BinaryDecodeError, Precision, SourceCompression};
use super::model::{RawChromatogram, RawPrecursor, RawSpectrum};

/// Errors raised while streaming an mzML document.
#[derive(Debug, thiserror::Error)]
pub enum MzmlError {
    /// Structural XML failure; conversion aborts.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Attribute text is not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The document itself is unusable; conversion aborts.
    #[error("invalid mzML document: {0}")]
    InvalidDocument(String),

    /// One record is broken; the cursor is already past it.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// One record's binary payload would not decode.
    #[error("binary decode: {0}")]
    BinaryDecode(#[from] BinaryDecodeError),
}

impl MzmlError {
    /// True when only the current record is affected and streaming can
    /// continue with the next one.
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            MzmlError::MalformedRecord(_) | MzmlError::BinaryDecode(_)
        )
    }
}

/// cvParam accessions the streamer understands.
mod accessions {
    pub const MS_LEVEL: &str = "MS:1000511";
    pub const POSITIVE_SCAN: &str = "MS:1000130";
    pub const NEGATIVE_SCAN: &str = "MS:1000129";
    pub const SCAN_START_TIME: &str = "MS:1000016";
    pub const SELECTED_ION_MZ: &str = "MS:1000744";
    pub const CHARGE_STATE: &str = "MS:1000041";
    pub const PEAK_INTENSITY: &str = "MS:1000042";
    pub const COLLISION_ENERGY: &str = "MS:1000045";
    pub const ISOLATION_TARGET_MZ: &str = "MS:1000827";
    pub const MZ_ARRAY: &str = "MS:1000514";
    pub const INTENSITY_ARRAY: &str = "MS:1000515";
    pub const TIME_ARRAY: &str = "MS:1000595";
    pub const ION_MOBILITY_ARRAY: &str = "MS:1002476";
    pub const INVERSE_MOBILITY_ARRAY: &str = "MS:1003006";
    pub const UNIT_MINUTE: &str = "UO:0000031";
}

/// A parsed cvParam, reduced to what dispatch needs.
struct CvParam {
    accession: String,
    value: Option<String>,
    unit_accession: Option<String>,
}

impl CvParam {
    fn value_f64(&self) -> Option<f64> {
        self.value.as_deref().and_then(|v| v.parse().ok())
    }

    fn value_i64(&self) -> Option<i64> {
        self.value.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Scan start times arrive in seconds or minutes depending on vendor.
fn normalize_retention_time(value: f64, unit_accession: Option<&str>) -> f64 {
    if unit_accession == Some(accessions::UNIT_MINUTE) {
        value * 60.0
    } else {
        value
    }
}

/// Pending binary array: cvParams collected, payload undecoded.
#[derive(Default)]
struct BinaryArrayContext {
    cv_params: Vec<CvParam>,
    base64_text: String,
}

enum ArrayKind {
    Mz,
    Intensity,
    Mobility,
    Time,
    Other,
}

impl BinaryArrayContext {
    fn decode(&self, declared_len: Option<usize>) -> Result<(ArrayKind, Vec<f64>), MzmlError> {
        let mut precision = Precision::default();
        let mut compression = SourceCompression::default();
        let mut kind = ArrayKind::Other;

        for cv in &self.cv_params {
            if let Some(p) = Precision::from_accession(&cv.accession) {
                precision = p;
            }
            if let Some(c) = SourceCompression::from_accession(&cv.accession) {
                compression = c;
            }
            match cv.accession.as_str() {
                accessions::MZ_ARRAY => kind = ArrayKind::Mz,
                accessions::INTENSITY_ARRAY => kind = ArrayKind::Intensity,
                accessions::TIME_ARRAY => kind = ArrayKind::Time,
                accessions::ION_MOBILITY_ARRAY | accessions::INVERSE_MOBILITY_ARRAY => {
                    kind = ArrayKind::Mobility
                }
                _ => {}
            }
        }

        let values =
            decode_binary_array(&self.base64_text, precision, compression, declared_len)?;
        Ok((kind, values))
    }
}

/// Streaming cursor over an mzML document.
pub struct MzmlStreamer<R: BufRead> {
    reader: Reader<R>,
    spectrum_count: Option<usize>,
    in_spectrum_list: bool,
    spectra_done: bool,
    in_chromatogram_list: bool,
    saw_root: bool,
    next_index: i64,
}

impl MzmlStreamer<BufReader<File>> {
    /// Open an mzML file for streaming.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MzmlError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::with_capacity(64 * 1024, file)))
    }
}

impl<R: BufRead> MzmlStreamer<R> {
    /// Create a streamer over any buffered reader.
    pub fn new(reader: R) -> Self {
        let mut xml = Reader::from_reader(reader);
        xml.config_mut().trim_text(true);
        Self {
            reader: xml,
            spectrum_count: None,
            in_spectrum_list: false,
            spectra_done: false,
            in_chromatogram_list: false,
            saw_root: false,
            next_index: 0,
        }
    }

    /// Declared spectrum count from the `spectrumList` element, once the
    /// cursor has reached it.
    pub fn spectrum_count(&self) -> Option<usize> {
        self.spectrum_count
    }

    /// Advance to and parse the next `<spectrum>` record.
    ///
    /// Returns `Ok(None)` once the spectrum list is exhausted. A
    /// record-local error leaves the cursor past the bad record; see
    /// [`MzmlError::is_record_local`].
    pub fn next_spectrum(&mut self) -> Result<Option<RawSpectrum>, MzmlError> {
        if self.spectra_done {
            return Ok(None);
        }

        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.name().as_ref() {
                    b"mzML" | b"indexedmzML" => self.saw_root = true,
                    b"spectrumList" => {
                        self.require_root()?;
                        self.in_spectrum_list = true;
                        self.spectrum_count =
                            get_attribute(&e, "count")?.and_then(|s| s.parse().ok());
                    }
                    b"spectrum" if self.in_spectrum_list => {
                        let fallback = self.next_index;
                        self.next_index += 1;
                        let index = get_attribute(&e, "index")?
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(fallback);
                        let native_id = get_attribute(&e, "id")?.unwrap_or_default();
                        let declared_len = get_attribute(&e, "defaultArrayLength")?
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        return self
                            .parse_spectrum(index, native_id, declared_len)
                            .map(Some);
                    }
                    b"chromatogramList" => {
                        self.require_root()?;
                        self.spectra_done = true;
                        self.in_chromatogram_list = true;
                        return Ok(None);
                    }
                    _ => {}
                },
                Event::End(e) => {
                    if e.name().as_ref() == b"spectrumList" {
                        self.in_spectrum_list = false;
                        self.spectra_done = true;
                        return Ok(None);
                    }
                }
                Event::Eof => {
                    if !self.saw_root {
                        return Err(MzmlError::InvalidDocument(
                            "no mzML root element".to_string(),
                        ));
                    }
                    self.spectra_done = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Advance to and parse the next `<chromatogram>` record. Call after
    /// [`next_spectrum`](Self::next_spectrum) has returned `None`.
    pub fn next_chromatogram(&mut self) -> Result<Option<RawChromatogram>, MzmlError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.name().as_ref() {
                    b"chromatogramList" => {
                        self.in_chromatogram_list = true;
                    }
                    b"chromatogram" if self.in_chromatogram_list => {
                        let id = get_attribute(&e, "id")?.unwrap_or_default();
                        let declared_len = get_attribute(&e, "defaultArrayLength")?
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        return self.parse_chromatogram(id, declared_len).map(Some);
                    }
                    name => {
                        // skip subtrees we are not interested in
                        let owned = name.to_vec();
                        self.reader
                            .read_to_end_into(quick_xml::name::QName(&owned), &mut Vec::new())?;
                    }
                },
                Event::End(e) => {
                    if e.name().as_ref() == b"chromatogramList" {
                        self.in_chromatogram_list = false;
                        return Ok(None);
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn require_root(&self) -> Result<(), MzmlError> {
        if self.saw_root {
            Ok(())
        } else {
            Err(MzmlError::InvalidDocument(
                "spectrum data outside an mzML root element".to_string(),
            ))
        }
    }

    /// Parse one `<spectrum>` element, consuming through its end tag
    /// before any decode error is surfaced.
    fn parse_spectrum(
        &mut self,
        index: i64,
        native_id: String,
        declared_len: usize,
    ) -> Result<RawSpectrum, MzmlError> {
        let mut raw = RawSpectrum {
            index,
            native_id,
            declared_len,
            ..Default::default()
        };

        let mut depth = 1u32;
        let mut in_scan_list = false;
        let mut in_precursor = false;
        let mut current_precursor: Option<RawPrecursor> = None;
        let mut current_binary: Option<BinaryArrayContext> = None;
        let mut binaries: Vec<BinaryArrayContext> = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    depth += 1;
                    match e.name().as_ref() {
                        b"scanList" => in_scan_list = true,
                        b"precursor" => {
                            in_precursor = true;
                            current_precursor = Some(RawPrecursor::default());
                        }
                        b"binaryDataArray" => current_binary = Some(BinaryArrayContext::default()),
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"cvParam" {
                        let cv = parse_cv_param(&e)?;
                        if let Some(ctx) = current_binary.as_mut() {
                            ctx.cv_params.push(cv);
                        } else if in_precursor {
                            if let Some(precursor) = current_precursor.as_mut() {
                                apply_precursor_cv(precursor, &cv);
                            }
                        } else if in_scan_list {
                            apply_scan_cv(&mut raw, &cv);
                        } else {
                            apply_spectrum_cv(&mut raw, &cv);
                        }
                    }
                }
                Event::Text(t) => {
                    if let Some(ctx) = current_binary.as_mut() {
                        ctx.base64_text.push_str(&t.unescape()?);
                    }
                }
                Event::End(e) => {
                    depth -= 1;
                    match e.name().as_ref() {
                        b"scanList" => in_scan_list = false,
                        b"precursor" => {
                            in_precursor = false;
                            // first precursor wins; MSn with several is out of model
                            if let Some(precursor) = current_precursor.take() {
                                raw.precursor.get_or_insert(precursor);
                            }
                        }
                        b"binaryDataArray" => {
                            if let Some(ctx) = current_binary.take() {
                                binaries.push(ctx);
                            }
                        }
                        b"spectrum" if depth == 0 => break,
                        _ => {}
                    }
                }
                Event::Eof => {
                    return Err(MzmlError::InvalidDocument(
                        "unexpected EOF inside spectrum".to_string(),
                    ))
                }
                _ => {}
            }
        }

        // The element is fully consumed; decode failures from here on
        // are record-local and the stream stays usable.
        let declared = Some(raw.declared_len).filter(|&n| n > 0);
        for ctx in binaries {
            let (kind, values) = ctx.decode(declared)?;
            match kind {
                ArrayKind::Mz => raw.mz_array = values,
                ArrayKind::Intensity => raw.intensity_array = values,
                ArrayKind::Mobility => raw.mobility_array = values,
                ArrayKind::Time | ArrayKind::Other => {}
            }
        }

        Ok(raw)
    }

    fn parse_chromatogram(
        &mut self,
        id: String,
        declared_len: usize,
    ) -> Result<RawChromatogram, MzmlError> {
        let mut raw = RawChromatogram {
            id,
            declared_len,
            ..Default::default()
        };

        let mut depth = 1u32;
        let mut current_binary: Option<BinaryArrayContext> = None;
        let mut binaries: Vec<BinaryArrayContext> = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    depth += 1;
                    if e.name().as_ref() == b"binaryDataArray" {
                        current_binary = Some(BinaryArrayContext::default());
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"cvParam" {
                        if let Some(ctx) = current_binary.as_mut() {
                            ctx.cv_params.push(parse_cv_param(&e)?);
                        }
                    }
                }
                Event::Text(t) => {
                    if let Some(ctx) = current_binary.as_mut() {
                        ctx.base64_text.push_str(&t.unescape()?);
                    }
                }
                Event::End(e) => {
                    depth -= 1;
                    match e.name().as_ref() {
                        b"binaryDataArray" => {
                            if let Some(ctx) = current_binary.take() {
                                binaries.push(ctx);
                            }
                        }
                        b"chromatogram" if depth == 0 => break,
                        _ => {}
                    }
                }
                Event::Eof => {
                    return Err(MzmlError::InvalidDocument(
                        "unexpected EOF inside chromatogram".to_string(),
                    ))
                }
                _ => {}
            }
        }

        let declared = Some(raw.declared_len).filter(|&n| n > 0);
        for ctx in binaries {
            let (kind, values) = ctx.decode(declared)?;
            match kind {
                ArrayKind::Time => raw.time_array = values,
                ArrayKind::Intensity => raw.intensity_array = values,
                _ => {}
            }
        }

        Ok(raw)
    }
}

fn apply_spectrum_cv(raw: &mut RawSpectrum, cv: &CvParam) {
    match cv.accession.as_str() {
        accessions::MS_LEVEL => raw.ms_level = cv.value_i64().unwrap_or(0) as i16,
        accessions::POSITIVE_SCAN => raw.polarity = 1,
        accessions::NEGATIVE_SCAN => raw.polarity = -1,
        _ => {}
    }
}

fn apply_scan_cv(raw: &mut RawSpectrum, cv: &CvParam) {
    match cv.accession.as_str() {
        accessions::SCAN_START_TIME => {
            if let Some(value) = cv.value_f64() {
                raw.retention_time = Some(normalize_retention_time(
                    value,
                    cv.unit_accession.as_deref(),
                ));
            }
        }
        _ => apply_spectrum_cv(raw, cv),
    }
}

fn apply_precursor_cv(precursor: &mut RawPrecursor, cv: &CvParam) {
    match cv.accession.as_str() {
        accessions::SELECTED_ION_MZ => precursor.selected_ion_mz = cv.value_f64(),
        accessions::ISOLATION_TARGET_MZ => precursor.isolation_target_mz = cv.value_f64(),
        accessions::CHARGE_STATE => precursor.charge = cv.value_i64().map(|v| v as i16),
        accessions::PEAK_INTENSITY => precursor.intensity = cv.value_f64(),
        accessions::COLLISION_ENERGY => precursor.collision_energy = cv.value_f64(),
        _ => {}
    }
}

fn get_attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, MzmlError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(std::str::from_utf8(&attr.value)?.to_string()));
        }
    }
    Ok(None)
}

fn parse_cv_param(e: &BytesStart<'_>) -> Result<CvParam, MzmlError> {
    Ok(CvParam {
        accession: get_attribute(e, "accession")?.unwrap_or_default(),
        value: get_attribute(e, "value")?,
        unit_accession: get_attribute(e, "unitAccession")?,
    })
}

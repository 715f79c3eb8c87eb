//! Binary array decoding for mzML.
//!
//! Peak arrays arrive as base64 text, optionally zlib-compressed, with
//! the element width (32- or 64-bit little-endian floats) declared per
//! array by cvParam accessions. The pipeline is
//! base64 -> (zlib) -> typed floats, widened to `f64`.

use std::io::Read;

use base64::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

/// Element width of an encoded array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit float (MS:1000521).
    Float32,
    /// 64-bit float (MS:1000523).
    #[default]
    Float64,
}

impl Precision {
    /// Map a cvParam accession to a precision, if it declares one.
    pub fn from_accession(accession: &str) -> Option<Self> {
        match accession {
            "MS:1000521" => Some(Precision::Float32),
            "MS:1000523" => Some(Precision::Float64),
            _ => None,
        }
    }

    fn byte_width(self) -> usize {
        match self {
            Precision::Float32 => 4,
            Precision::Float64 => 8,
        }
    }
}

/// Compression applied to an encoded array in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceCompression {
    /// Raw binary (MS:1000576).
    #[default]
    None,
    /// zlib (MS:1000574).
    Zlib,
}

impl SourceCompression {
    /// Map a cvParam accession to a compression mode, if it declares one.
    pub fn from_accession(accession: &str) -> Option<Self> {
        match accession {
            "MS:1000574" => Some(SourceCompression::Zlib),
            "MS:1000576" => Some(SourceCompression::None),
            _ => None,
        }
    }
}

/// Errors from the binary decode pipeline. These are per-record: the
/// converter skips the offending scan rather than aborting.
#[derive(Debug, thiserror::Error)]
pub enum BinaryDecodeError {
    /// The payload is not valid base64.
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The compressed payload would not inflate.
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    /// The byte count does not divide by the element width.
    #[error("byte length {actual} is not a multiple of element width {width}")]
    RaggedBuffer {
        /// Byte length after decompression.
        actual: usize,
        /// Declared element width in bytes.
        width: usize,
    },

    /// Decoded length disagrees with the record's declared length.
    #[error("array has {actual} values, source declared {declared}")]
    LengthMismatch {
        /// Length the record declared.
        declared: usize,
        /// Length actually decoded.
        actual: usize,
    },
}

/// Decode one base64 binary array into `f64` values.
///
/// `declared_len` is the record's `defaultArrayLength`; when present the
/// decoded length must match it.
pub fn decode_binary_array(
    base64_text: &str,
    precision: Precision,
    compression: SourceCompression,
    declared_len: Option<usize>,
) -> Result<Vec<f64>, BinaryDecodeError> {
    let trimmed = base64_text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let decoded = BASE64_STANDARD.decode(trimmed)?;

    let raw = match compression {
        SourceCompression::None => decoded,
        SourceCompression::Zlib => {
            let mut inflated = Vec::new();
            ZlibDecoder::new(&decoded[..]).read_to_end(&mut inflated)?;
            inflated
        }
    };

    let values = bytes_to_floats(&raw, precision)?;

    if let Some(declared) = declared_len {
        if values.len() != declared {
            return Err(BinaryDecodeError::LengthMismatch {
                declared,
                actual: values.len(),
            });
        }
    }

    Ok(values)
}

fn bytes_to_floats(bytes: &[u8], precision: Precision) -> Result<Vec<f64>, BinaryDecodeError> {
    let width = precision.byte_width();
    if bytes.len() % width != 0 {
        return Err(BinaryDecodeError::RaggedBuffer {
            actual: bytes.len(),
            width,
        });
    }

    let count = bytes.len() / width;
    let mut values = Vec::with_capacity(count);
    let mut cursor = std::io::Cursor::new(bytes);

    match precision {
        Precision::Float32 => {
            for _ in 0..count {
                values.push(cursor.read_f32::<LittleEndian>()? as f64);
            }
        }
        Precision::Float64 => {
            for _ in 0..count {
                values.push(cursor.read_f64::<LittleEndian>()?);
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_f64(values: &[f64]) -> String {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BASE64_STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_uncompressed_f64() {
        let text = encode_f64(&[100.0, 200.0]);
        let values = decode_binary_array(
            &text,
            Precision::Float64,
            SourceCompression::None,
            Some(2),
        )
        .expect("decode");
        assert_eq!(values, vec![100.0, 200.0]);
    }

    #[test]
    fn decodes_uncompressed_f32() {
        let mut bytes = Vec::new();
        for v in [100.0f32, 200.0f32] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let text = BASE64_STANDARD.encode(bytes);

        let values = decode_binary_array(
            &text,
            Precision::Float32,
            SourceCompression::None,
            Some(2),
        )
        .expect("decode");
        assert!((values[0] - 100.0).abs() < 1e-5);
        assert!((values[1] - 200.0).abs() < 1e-5);
    }

    #[test]
    fn decodes_zlib_compressed() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let values = [100.0f64, 200.0, 300.0];
        let mut bytes = Vec::new();
        for v in &values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).expect("compress");
        let compressed = encoder.finish().expect("finish");
        let text = BASE64_STANDARD.encode(&compressed);

        let decoded = decode_binary_array(
            &text,
            Precision::Float64,
            SourceCompression::Zlib,
            Some(3),
        )
        .expect("decode");
        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_text_decodes_to_empty() {
        let values =
            decode_binary_array("  ", Precision::Float64, SourceCompression::None, None)
                .expect("decode");
        assert!(values.is_empty());
    }

    #[test]
    fn length_mismatch_is_reported() {
        let text = encode_f64(&[1.0, 2.0, 3.0]);
        let result =
            decode_binary_array(&text, Precision::Float64, SourceCompression::None, Some(2));
        assert!(matches!(
            result,
            Err(BinaryDecodeError::LengthMismatch {
                declared: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn ragged_buffer_is_reported() {
        let text = BASE64_STANDARD.encode([0u8; 10]);
        let result = decode_binary_array(&text, Precision::Float64, SourceCompression::None, None);
        assert!(matches!(result, Err(BinaryDecodeError::RaggedBuffer { .. })));
    }
}

//! Conversion pipeline tests: synthetic mzML documents in, bundles out.

#![cfg(feature = "mzml")]

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::prelude::*;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tempfile::TempDir;

use peakrow::mzml::{convert, ConvertConfig, ConvertError, MzmlConverter};
use peakrow::reader::StoreReader;

fn encode_f64(values: &[f64]) -> String {
    let mut bytes = Vec::new();
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

fn encode_f32(values: &[f32]) -> String {
    let mut bytes = Vec::new();
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

fn encode_f64_zlib(values: &[f64]) -> String {
    let mut bytes = Vec::new();
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).expect("compress");
    BASE64_STANDARD.encode(encoder.finish().expect("finish"))
}

fn binary_array(kind_accession: &str, kind_name: &str, precision: &str, text: &str) -> String {
    let (p_acc, p_name) = match precision {
        "f32" => ("MS:1000521", "32-bit float"),
        _ => ("MS:1000523", "64-bit float"),
    };
    format!(
        r#"<binaryDataArray>
  <cvParam cvRef="MS" accession="{p_acc}" name="{p_name}"/>
  <cvParam cvRef="MS" accession="MS:1000576" name="no compression"/>
  <cvParam cvRef="MS" accession="{kind_accession}" name="{kind_name}"/>
  <binary>{text}</binary>
</binaryDataArray>"#
    )
}

fn survey_spectrum(index: usize, scan: usize, mz: &[f64], intensity: &[f32]) -> String {
    format!(
        r#"<spectrum index="{index}" id="scan={scan}" defaultArrayLength="{len}">
  <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>
  <cvParam cvRef="MS" accession="MS:1000130" name="positive scan"/>
  <scanList count="1"><scan>
    <cvParam cvRef="MS" accession="MS:1000016" name="scan start time" value="{rt}" unitCvRef="UO" unitAccession="UO:0000010" unitName="second"/>
  </scan></scanList>
  <binaryDataArrayList count="2">
    {mz_array}
    {int_array}
  </binaryDataArrayList>
</spectrum>"#,
        len = mz.len(),
        rt = 10.0 * (index + 1) as f64,
        mz_array = binary_array("MS:1000514", "m/z array", "f64", &encode_f64(mz)),
        int_array = binary_array("MS:1000515", "intensity array", "f32", &encode_f32(intensity)),
    )
}

fn document(spectra: &[String], chromatograms: &[String]) -> String {
    let chromatogram_list = if chromatograms.is_empty() {
        String::new()
    } else {
        format!(
            r#"<chromatogramList count="{}">{}</chromatogramList>"#,
            chromatograms.len(),
            chromatograms.join("\n")
        )
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<mzML xmlns="http://psi.hupo.org/ms/mzml" version="1.1.0">
  <run id="test_run">
    <spectrumList count="{}">{}</spectrumList>
    {}
  </run>
</mzML>"#,
        spectra.len(),
        spectra.join("\n"),
        chromatogram_list
    )
}

fn write_source(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("input.mzML");
    std::fs::write(&path, content).expect("write source");
    path
}

#[test]
fn converts_survey_and_fragment_scans() {
    let dir = TempDir::new().expect("tempdir");

    let ms2 = format!(
        r#"<spectrum index="1" id="scan=2" defaultArrayLength="1">
  <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="2"/>
  <cvParam cvRef="MS" accession="MS:1000130" name="positive scan"/>
  <scanList count="1"><scan>
    <cvParam cvRef="MS" accession="MS:1000016" name="scan start time" value="0.5" unitCvRef="UO" unitAccession="UO:0000031" unitName="minute"/>
  </scan></scanList>
  <precursorList count="1"><precursor>
    <selectedIonList count="1"><selectedIon>
      <cvParam cvRef="MS" accession="MS:1000744" name="selected ion m/z" value="500.25"/>
      <cvParam cvRef="MS" accession="MS:1000041" name="charge state" value="2"/>
    </selectedIon></selectedIonList>
    <activation>
      <cvParam cvRef="MS" accession="MS:1000045" name="collision energy" value="30.0"/>
    </activation>
  </precursor></precursorList>
  <binaryDataArrayList count="2">
    {}
    {}
  </binaryDataArrayList>
</spectrum>"#,
        binary_array("MS:1000514", "m/z array", "f64", &encode_f64(&[250.0])),
        binary_array("MS:1000515", "intensity array", "f32", &encode_f32(&[99.0])),
    );

    let doc = document(
        &[
            survey_spectrum(0, 1, &[100.0, 200.0], &[1000.0, 2000.0]),
            ms2,
        ],
        &[],
    );
    let source = write_source(&dir, &doc);
    let dest = dir.path().join("out.peakrow");

    let stats = convert(&source, &dest).expect("convert");
    assert_eq!(stats.spectra_count, 2);
    assert_eq!(stats.ms1_spectra, 1);
    assert_eq!(stats.ms2_spectra, 1);
    assert_eq!(stats.peak_count, 3);
    assert_eq!(stats.skipped_records, 0);

    let mut reader = StoreReader::open(&dest).expect("open");
    assert_eq!(reader.summary().num_spectra, 2);

    // spectrum_id comes from the native scan number
    let ms2 = reader.get_spectrum(2).expect("found");
    assert_eq!(ms2.ms_level, 2);
    assert_eq!(ms2.retention_time, 30.0); // minutes normalized to seconds
    let precursor = ms2.precursor.expect("precursor");
    assert_eq!(precursor.mz, 500.25);
    assert_eq!(precursor.collision_energy, Some(30.0));
}

#[test]
fn malformed_record_is_skipped_and_counted() {
    let dir = TempDir::new().expect("tempdir");

    let mut bad = survey_spectrum(1, 2, &[300.0], &[1.0]);
    bad = bad.replace(&encode_f64(&[300.0]), "***garbage***");

    let doc = document(
        &[
            survey_spectrum(0, 1, &[100.0, 200.0], &[1.0, 2.0]),
            bad,
            survey_spectrum(2, 3, &[400.0], &[3.0]),
        ],
        &[],
    );
    let source = write_source(&dir, &doc);
    let dest = dir.path().join("out.peakrow");

    let stats = convert(&source, &dest).expect("convert");
    assert_eq!(stats.spectra_count, 2);
    assert_eq!(stats.skipped_records, 1);
    assert_eq!(stats.peak_count, 3);

    // the good records on either side survived
    let mut reader = StoreReader::open(&dest).expect("open");
    assert!(reader.get_spectrum(1).is_ok());
    assert!(reader.get_spectrum(3).is_ok());
}

#[test]
fn zlib_compressed_arrays_decode() {
    let dir = TempDir::new().expect("tempdir");

    let mz_text = encode_f64_zlib(&[111.0, 222.0, 333.0]);
    let spectrum = format!(
        r#"<spectrum index="0" id="scan=1" defaultArrayLength="3">
  <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>
  <binaryDataArrayList count="2">
    <binaryDataArray>
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float"/>
      <cvParam cvRef="MS" accession="MS:1000574" name="zlib compression"/>
      <cvParam cvRef="MS" accession="MS:1000514" name="m/z array"/>
      <binary>{mz_text}</binary>
    </binaryDataArray>
    {int_array}
  </binaryDataArrayList>
</spectrum>"#,
        int_array = binary_array(
            "MS:1000515",
            "intensity array",
            "f32",
            &encode_f32(&[1.0, 2.0, 3.0])
        ),
    );

    let source = write_source(&dir, &document(&[spectrum], &[]));
    let dest = dir.path().join("out.peakrow");

    convert(&source, &dest).expect("convert");

    let mut reader = StoreReader::open(&dest).expect("open");
    let spectrum = reader.get_spectrum(1).expect("found");
    assert_eq!(spectrum.peaks.mz, vec![111.0, 222.0, 333.0]);
}

#[test]
fn ion_mobility_arrays_carry_into_the_store() {
    let dir = TempDir::new().expect("tempdir");

    let spectrum = format!(
        r#"<spectrum index="0" id="scan=1" defaultArrayLength="2">
  <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>
  <binaryDataArrayList count="3">
    {}
    {}
    {}
  </binaryDataArrayList>
</spectrum>"#,
        binary_array("MS:1000514", "m/z array", "f64", &encode_f64(&[100.0, 200.0])),
        binary_array(
            "MS:1000515",
            "intensity array",
            "f32",
            &encode_f32(&[1.0, 2.0])
        ),
        binary_array(
            "MS:1002476",
            "ion mobility drift time array",
            "f64",
            &encode_f64(&[0.8, 0.9])
        ),
    );

    let source = write_source(&dir, &document(&[spectrum], &[]));
    let dest = dir.path().join("out.peakrow");

    convert(&source, &dest).expect("convert");

    let mut reader = StoreReader::open(&dest).expect("open");
    let spectrum = reader.get_spectrum(1).expect("found");
    let mobility = spectrum.peaks.ion_mobility.expect("mobility");
    assert_eq!(mobility.values, vec![0.8, 0.9]);
    assert_eq!(mobility.validity, vec![true, true]);
}

#[test]
fn chromatograms_convert_into_their_column_group() {
    let dir = TempDir::new().expect("tempdir");

    let tic = format!(
        r#"<chromatogram index="0" id="TIC" defaultArrayLength="3">
  <binaryDataArrayList count="2">
    {}
    {}
  </binaryDataArrayList>
</chromatogram>"#,
        binary_array(
            "MS:1000595",
            "time array",
            "f64",
            &encode_f64(&[0.0, 1.0, 2.0])
        ),
        binary_array(
            "MS:1000515",
            "intensity array",
            "f64",
            &encode_f64(&[10.0, 20.0, 5.0])
        ),
    );

    let doc = document(&[survey_spectrum(0, 1, &[100.0], &[1.0])], &[tic]);
    let source = write_source(&dir, &doc);
    let dest = dir.path().join("out.peakrow");

    let stats = convert(&source, &dest).expect("convert");
    assert_eq!(stats.chromatogram_count, 1);

    let reader = StoreReader::open(&dest).expect("open");
    let traces = reader.read_chromatograms().expect("read");
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].id, "TIC");
    assert_eq!(traces[0].time, vec![0.0, 1.0, 2.0]);
    assert_eq!(traces[0].intensity, vec![10.0, 20.0, 5.0]);
}

#[test]
fn unparsable_document_aborts() {
    let dir = TempDir::new().expect("tempdir");
    let source = dir.path().join("input.mzML");
    std::fs::write(&source, "this is not xml at all").expect("write");
    let dest = dir.path().join("out.peakrow");

    let result = convert(&source, &dest);
    assert!(matches!(result, Err(ConvertError::Parse(_))));

    // the aborted bundle has no manifest and is rejected
    assert!(StoreReader::open(&dest).is_err());
}

#[test]
fn cancellation_flag_aborts_between_records() {
    let dir = TempDir::new().expect("tempdir");
    let doc = document(&[survey_spectrum(0, 1, &[100.0], &[1.0])], &[]);
    let source = write_source(&dir, &doc);
    let dest = dir.path().join("out.peakrow");

    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);

    let converter = MzmlConverter::with_config(ConvertConfig {
        writer_config: Default::default(),
        cancel: Some(cancel),
    });

    assert!(matches!(
        converter.convert(&source, &dest),
        Err(ConvertError::Aborted)
    ));
    assert!(StoreReader::open(&dest).is_err());
}

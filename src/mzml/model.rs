//! Pull-parse targets for mzML records.
//!
//! One value per scan or chromatogram record, holding exactly what the
//! converter needs; document-level metadata the store does not persist is
//! skimmed past by the streamer instead of being modeled here.

/// Precursor information pulled from a `<precursor>` element.
#[derive(Debug, Clone, Default)]
pub struct RawPrecursor {
    /// Selected ion m/z (MS:1000744).
    pub selected_ion_mz: Option<f64>,
    /// Isolation window target m/z (MS:1000827), fallback when no
    /// selected ion is given.
    pub isolation_target_mz: Option<f64>,
    /// Charge state (MS:1000041).
    pub charge: Option<i16>,
    /// Selected ion intensity (MS:1000042).
    pub intensity: Option<f64>,
    /// Collision energy in eV (MS:1000045).
    pub collision_energy: Option<f64>,
}

impl RawPrecursor {
    /// The m/z to persist: selected ion, falling back to the isolation
    /// window target.
    pub fn mz(&self) -> Option<f64> {
        self.selected_ion_mz.or(self.isolation_target_mz)
    }
}

/// One `<spectrum>` record with its decoded arrays.
#[derive(Debug, Clone, Default)]
pub struct RawSpectrum {
    /// Document-order index (0-based).
    pub index: i64,
    /// Native id string, e.g. `controllerType=0 controllerNumber=1 scan=7`.
    pub native_id: String,
    /// Declared array length (`defaultArrayLength`).
    pub declared_len: usize,
    /// MS level; 0 when the record never declared one.
    pub ms_level: i16,
    /// 1 positive, -1 negative, 0 undeclared.
    pub polarity: i8,
    /// Retention time in seconds.
    pub retention_time: Option<f64>,
    /// First precursor record, if any.
    pub precursor: Option<RawPrecursor>,
    /// Decoded m/z array.
    pub mz_array: Vec<f64>,
    /// Decoded intensity array.
    pub intensity_array: Vec<f64>,
    /// Decoded ion mobility array; empty when the scan has none.
    pub mobility_array: Vec<f64>,
}

impl RawSpectrum {
    /// Extract the scan number from the native id.
    ///
    /// Handles `scan=N` (optionally embedded in a longer id) and the
    /// bare `SN` form; falls back to `index + 1`.
    pub fn scan_number(&self) -> i64 {
        if let Some(pos) = self.native_id.find("scan=") {
            let start = pos + 5;
            let end = self.native_id[start..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| start + i)
                .unwrap_or(self.native_id.len());
            if let Ok(n) = self.native_id[start..end].parse() {
                return n;
            }
        } else if let Some(rest) = self.native_id.strip_prefix('S') {
            if let Ok(n) = rest.parse() {
                return n;
            }
        }
        self.index + 1
    }

    /// Number of decoded peaks.
    pub fn peak_count(&self) -> usize {
        self.mz_array.len()
    }
}

/// One `<chromatogram>` record with its decoded arrays.
#[derive(Debug, Clone, Default)]
pub struct RawChromatogram {
    /// Native id string, e.g. `TIC`.
    pub id: String,
    /// Declared array length.
    pub declared_len: usize,
    /// Decoded time array in seconds.
    pub time_array: Vec<f64>,
    /// Decoded intensity array.
    pub intensity_array: Vec<f64>,
}

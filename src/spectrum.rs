//! In-memory spectrum model.
//!
//! A [`Spectrum`] is one instrument scan: identity, acquisition metadata,
//! an optional precursor record, and the peak arrays in SoA layout. Peak
//! storage keeps `mz` and `intensity` as parallel vectors; ion mobility is
//! a dense value array plus a parallel validity mask, so a peak can have a
//! slot without a meaningful reading while the column stays fixed-width.
//!
//! Instances are produced by [`crate::builder::SpectrumBuilder`] or from
//! raw arrays via [`SpectrumArrays`]; once handed to a writer they are
//! consumed and the persisted columnar layout becomes the state of record.

/// Errors raised when spectrum data violates the model invariants.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The builder was finalized without an MS level.
    #[error("ms_level was not set")]
    MissingMsLevel,

    /// MS level below 1.
    #[error("ms_level must be >= 1, got {0}")]
    InvalidMsLevel(i16),

    /// Polarity outside -1/0/1.
    #[error("polarity must be -1, 0, or 1, got {0}")]
    InvalidPolarity(i8),

    /// NaN or infinite retention time.
    #[error("retention_time must be finite, got {0}")]
    NonFiniteRetentionTime(f64),

    /// Precursor data on a survey scan.
    #[error("precursor supplied for survey scan (ms_level 1)")]
    UnexpectedPrecursor,

    /// Fragmentation scan without a precursor record.
    #[error("fragmentation scan (ms_level {0}) is missing its precursor")]
    MissingPrecursor(i16),

    /// Parallel peak arrays of unequal length.
    #[error("{column} length {actual} does not match mz length {expected}")]
    LengthMismatch {
        /// Name of the mismatched column.
        column: &'static str,
        /// Length of the `mz` array.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Zero peaks under a require-peaks policy.
    #[error("spectrum has no peaks")]
    EmptyPeaks,

    /// A spectrum id was written twice.
    #[error("duplicate spectrum_id {0}: ids must be unique within a store")]
    DuplicateSpectrumId(i64),
}

/// Precursor ion record for fragmentation scans.
///
/// Present iff `ms_level >= 2`; absence is modeled by `Option<Precursor>`
/// on the spectrum, never by zeroed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Precursor {
    /// Selected ion m/z.
    pub mz: f64,
    /// Charge state; `None` when the instrument could not assign one.
    pub charge: Option<i16>,
    /// Selected ion intensity.
    pub intensity: Option<f32>,
    /// Collision energy in eV.
    pub collision_energy: Option<f32>,
}

impl Precursor {
    /// Create a precursor record with only the selected ion m/z known.
    pub fn new(mz: f64) -> Self {
        Self {
            mz,
            charge: None,
            intensity: None,
            collision_energy: None,
        }
    }
}

/// Dense per-peak ion mobility with a parallel validity mask.
///
/// `values` and `validity` always have the same length as the owning
/// spectrum's `mz` array. A `false` validity slot means the stored value
/// is a placeholder, not an observation; the placeholder round-trips
/// through the store unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct IonMobility {
    /// Mobility values, one slot per peak.
    pub values: Vec<f64>,
    /// True where the corresponding value is meaningful.
    pub validity: Vec<bool>,
}

impl IonMobility {
    /// Build a column where every slot is a real reading.
    pub fn dense(values: Vec<f64>) -> Self {
        let validity = vec![true; values.len()];
        Self { values, validity }
    }

    /// Build a column with an explicit validity mask.
    pub fn with_validity(values: Vec<f64>, validity: Vec<bool>) -> Self {
        Self { values, validity }
    }

    /// Number of slots (valid or not).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the column has no slots.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SoA peak storage for a single spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakArrays {
    /// Mass-to-charge ratios.
    pub mz: Vec<f64>,
    /// Signal intensities.
    pub intensity: Vec<f32>,
    /// Optional ion mobility column; `None` when the scan has no mobility
    /// dimension at all.
    pub ion_mobility: Option<IonMobility>,
}

impl PeakArrays {
    /// Create peak arrays without ion mobility.
    pub fn new(mz: Vec<f64>, intensity: Vec<f32>) -> Self {
        Self {
            mz,
            intensity,
            ion_mobility: None,
        }
    }

    /// Number of peaks.
    pub fn len(&self) -> usize {
        self.mz.len()
    }

    /// True when there are no peaks.
    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Check that every parallel array has the same length.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.mz.len();
        if self.intensity.len() != len {
            return Err(ValidationError::LengthMismatch {
                column: "intensity",
                expected: len,
                actual: self.intensity.len(),
            });
        }
        if let Some(mobility) = &self.ion_mobility {
            if mobility.values.len() != len {
                return Err(ValidationError::LengthMismatch {
                    column: "ion_mobility",
                    expected: len,
                    actual: mobility.values.len(),
                });
            }
            if mobility.validity.len() != len {
                return Err(ValidationError::LengthMismatch {
                    column: "ion_mobility validity",
                    expected: len,
                    actual: mobility.validity.len(),
                });
            }
        }
        Ok(())
    }
}

/// One instrument scan with its peak arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Unique identifier within a store; the random-access key.
    pub spectrum_id: i64,
    /// Sequential position of first appearance in the acquisition.
    pub spectrum_index: i64,
    /// MS level: 1 = survey scan, >=2 = fragmentation scan.
    pub ms_level: i16,
    /// Retention time in seconds.
    pub retention_time: f64,
    /// 1 positive, -1 negative, 0 unknown.
    pub polarity: i8,
    /// Precursor record, present iff `ms_level >= 2`.
    pub precursor: Option<Precursor>,
    /// Peak arrays.
    pub peaks: PeakArrays,
}

impl Spectrum {
    /// Number of peaks in this spectrum.
    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }

    /// Summed intensity over all peaks.
    pub fn total_ion_current(&self) -> f64 {
        self.peaks.intensity.iter().map(|&i| i as f64).sum()
    }

    /// The `(mz, intensity)` of the most intense peak, if any.
    pub fn base_peak(&self) -> Option<(f64, f32)> {
        let mut best: Option<(f64, f32)> = None;
        for (&mz, &intensity) in self.peaks.mz.iter().zip(&self.peaks.intensity) {
            match best {
                Some((_, top)) if intensity <= top => {}
                _ => best = Some((mz, intensity)),
            }
        }
        best
    }

    /// Check every model invariant: field ranges, precursor presence iff
    /// `ms_level >= 2`, and parallel array lengths.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ms_level < 1 {
            return Err(ValidationError::InvalidMsLevel(self.ms_level));
        }
        if !matches!(self.polarity, -1 | 0 | 1) {
            return Err(ValidationError::InvalidPolarity(self.polarity));
        }
        if !self.retention_time.is_finite() {
            return Err(ValidationError::NonFiniteRetentionTime(self.retention_time));
        }
        match (&self.precursor, self.ms_level) {
            (Some(_), 1) => return Err(ValidationError::UnexpectedPrecursor),
            (None, level) if level >= 2 => {
                return Err(ValidationError::MissingPrecursor(level))
            }
            _ => {}
        }
        self.peaks.validate()
    }
}

/// Raw-array ingestion bundle for vectorized writers.
///
/// Carries the same fields as [`Spectrum`] but with the peak columns laid
/// out as loose vectors, so callers that already hold decoded arrays can
/// skip per-peak builder calls. Validation happens when the bundle is
/// turned into a spectrum (or handed to a writer), not on construction.
#[derive(Debug, Clone)]
pub struct SpectrumArrays {
    /// Unique identifier within the destination store.
    pub spectrum_id: i64,
    /// Sequential position of first appearance.
    pub spectrum_index: i64,
    /// MS level.
    pub ms_level: i16,
    /// Retention time in seconds.
    pub retention_time: f64,
    /// 1 positive, -1 negative, 0 unknown.
    pub polarity: i8,
    /// Precursor record, required iff `ms_level >= 2`.
    pub precursor: Option<Precursor>,
    /// Mass-to-charge values.
    pub mz: Vec<f64>,
    /// Intensity values, parallel to `mz`.
    pub intensity: Vec<f32>,
    /// Optional mobility values; paired with `mobility_validity`.
    pub ion_mobility: Option<Vec<f64>>,
    /// Validity mask for `ion_mobility`. `None` with mobility present
    /// means every slot is valid.
    pub mobility_validity: Option<Vec<bool>>,
}

impl SpectrumArrays {
    /// Validate the bundle and convert it into an immutable [`Spectrum`].
    pub fn into_spectrum(self) -> Result<Spectrum, ValidationError> {
        let ion_mobility = match (self.ion_mobility, self.mobility_validity) {
            (Some(values), Some(validity)) => Some(IonMobility::with_validity(values, validity)),
            (Some(values), None) => Some(IonMobility::dense(values)),
            (None, _) => None,
        };

        let spectrum = Spectrum {
            spectrum_id: self.spectrum_id,
            spectrum_index: self.spectrum_index,
            ms_level: self.ms_level,
            retention_time: self.retention_time,
            polarity: self.polarity,
            precursor: self.precursor,
            peaks: PeakArrays {
                mz: self.mz,
                intensity: self.intensity,
                ion_mobility,
            },
        };
        spectrum.validate()?;
        Ok(spectrum)
    }
}

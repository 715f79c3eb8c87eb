//! Staged, validating constructor for [`Spectrum`] values.
//!
//! Setters may be chained in any order; every constraint is checked once,
//! at [`SpectrumBuilder::build`]. The builder is consumed by `build`, so a
//! finished (or failed) builder cannot be reused and no partially-built
//! spectrum is ever observable.

use crate::spectrum::{IonMobility, PeakArrays, Precursor, Spectrum, ValidationError};

/// Fluent builder producing an immutable [`Spectrum`].
///
/// ```
/// use peakrow::builder::SpectrumBuilder;
///
/// let spectrum = SpectrumBuilder::new(0, 0)
///     .ms_level(2)
///     .retention_time(61.5)
///     .polarity(1)
///     .precursor(500.25, Some(2), Some(123.0))
///     .collision_energy(27.0)
///     .add_peak(200.1, 1500.0)
///     .add_peak(340.7, 800.0)
///     .build()?;
///
/// assert_eq!(spectrum.peak_count(), 2);
/// # Ok::<(), peakrow::spectrum::ValidationError>(())
/// ```
pub struct SpectrumBuilder {
    spectrum_id: i64,
    spectrum_index: i64,
    ms_level: Option<i16>,
    retention_time: f64,
    polarity: i8,
    precursor: Option<Precursor>,
    collision_energy: Option<f32>,
    mz: Vec<f64>,
    intensity: Vec<f32>,
    mobility_values: Vec<f64>,
    mobility_validity: Vec<bool>,
    has_mobility: bool,
    require_peaks: bool,
}

impl SpectrumBuilder {
    /// Start a builder for the spectrum with the given identity.
    pub fn new(spectrum_id: i64, spectrum_index: i64) -> Self {
        Self {
            spectrum_id,
            spectrum_index,
            ms_level: None,
            retention_time: 0.0,
            polarity: 1,
            precursor: None,
            collision_energy: None,
            mz: Vec::new(),
            intensity: Vec::new(),
            mobility_values: Vec::new(),
            mobility_validity: Vec::new(),
            has_mobility: false,
            require_peaks: false,
        }
    }

    /// Set the MS level (1 for a survey scan, 2+ for fragmentation).
    pub fn ms_level(mut self, level: i16) -> Self {
        self.ms_level = Some(level);
        self
    }

    /// Set the retention time in seconds.
    pub fn retention_time(mut self, rt: f64) -> Self {
        self.retention_time = rt;
        self
    }

    /// Set the polarity (1 positive, -1 negative).
    pub fn polarity(mut self, polarity: i8) -> Self {
        self.polarity = polarity;
        self
    }

    /// Supply precursor information for a fragmentation scan.
    pub fn precursor(mut self, mz: f64, charge: Option<i16>, intensity: Option<f32>) -> Self {
        self.precursor = Some(Precursor {
            mz,
            charge,
            intensity,
            collision_energy: None,
        });
        self
    }

    /// Set the collision energy in eV; merged into the precursor record.
    pub fn collision_energy(mut self, ce: f32) -> Self {
        self.collision_energy = Some(ce);
        self
    }

    /// Reject spectra with zero peaks at build time. The store itself
    /// accepts empty spectra; this is a caller policy.
    pub fn require_peaks(mut self, required: bool) -> Self {
        self.require_peaks = required;
        self
    }

    /// Append one peak.
    pub fn add_peak(mut self, mz: f64, intensity: f32) -> Self {
        self.mz.push(mz);
        self.intensity.push(intensity);
        self.mobility_values.push(0.0);
        self.mobility_validity.push(false);
        self
    }

    /// Append one peak carrying an ion mobility reading.
    pub fn add_peak_with_mobility(mut self, mz: f64, intensity: f32, mobility: f64) -> Self {
        self.mz.push(mz);
        self.intensity.push(intensity);
        self.mobility_values.push(mobility);
        self.mobility_validity.push(true);
        self.has_mobility = true;
        self
    }

    /// Finalize, checking every invariant, and yield the spectrum.
    pub fn build(self) -> Result<Spectrum, ValidationError> {
        let ms_level = self.ms_level.ok_or(ValidationError::MissingMsLevel)?;

        // A collision energy without a precursor is precursor data on a
        // survey scan as far as invariant checking is concerned.
        let precursor = match (self.precursor, self.collision_energy) {
            (Some(mut precursor), ce) => {
                precursor.collision_energy = ce;
                Some(precursor)
            }
            (None, Some(_)) => return Err(ValidationError::UnexpectedPrecursor),
            (None, None) => None,
        };

        if self.require_peaks && self.mz.is_empty() {
            return Err(ValidationError::EmptyPeaks);
        }

        let ion_mobility = if self.has_mobility {
            Some(IonMobility::with_validity(
                self.mobility_values,
                self.mobility_validity,
            ))
        } else {
            None
        };

        let spectrum = Spectrum {
            spectrum_id: self.spectrum_id,
            spectrum_index: self.spectrum_index,
            ms_level,
            retention_time: self.retention_time,
            polarity: self.polarity,
            precursor,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ms1_spectrum() {
        let spectrum = SpectrumBuilder::new(0, 0)
            .ms_level(1)
            .retention_time(60.0)
            .polarity(1)
            .add_peak(400.0, 10_000.0)
            .add_peak(500.0, 20_000.0)
            .build()
            .expect("valid spectrum");

        assert_eq!(spectrum.spectrum_id, 0);
        assert_eq!(spectrum.ms_level, 1);
        assert_eq!(spectrum.peak_count(), 2);
        assert!(spectrum.precursor.is_none());
        assert!(spectrum.peaks.ion_mobility.is_none());
    }

    #[test]
    fn missing_ms_level_fails() {
        let result = SpectrumBuilder::new(0, 0).add_peak(100.0, 1.0).build();
        assert!(matches!(result, Err(ValidationError::MissingMsLevel)));
    }

    #[test]
    fn precursor_on_ms1_fails() {
        let result = SpectrumBuilder::new(0, 0)
            .ms_level(1)
            .precursor(500.0, Some(2), None)
            .add_peak(100.0, 1.0)
            .build();
        assert!(matches!(result, Err(ValidationError::UnexpectedPrecursor)));
    }

    #[test]
    fn collision_energy_without_precursor_fails() {
        let result = SpectrumBuilder::new(0, 0)
            .ms_level(1)
            .collision_energy(30.0)
            .add_peak(100.0, 1.0)
            .build();
        assert!(matches!(result, Err(ValidationError::UnexpectedPrecursor)));
    }

    #[test]
    fn ms2_without_precursor_fails() {
        let result = SpectrumBuilder::new(1, 1)
            .ms_level(2)
            .add_peak(100.0, 1.0)
            .build();
        assert!(matches!(result, Err(ValidationError::MissingPrecursor(2))));
    }

    #[test]
    fn collision_energy_lands_on_precursor() {
        let spectrum = SpectrumBuilder::new(1, 1)
            .ms_level(2)
            .precursor(500.25, Some(2), Some(123.0))
            .collision_energy(27.5)
            .add_peak(100.0, 1.0)
            .build()
            .expect("valid spectrum");

        let precursor = spectrum.precursor.expect("precursor present");
        assert_eq!(precursor.mz, 500.25);
        assert_eq!(precursor.charge, Some(2));
        assert_eq!(precursor.collision_energy, Some(27.5));
    }

    #[test]
    fn empty_peaks_policy_is_opt_in() {
        assert!(SpectrumBuilder::new(0, 0).ms_level(1).build().is_ok());
        assert!(matches!(
            SpectrumBuilder::new(0, 0)
                .ms_level(1)
                .require_peaks(true)
                .build(),
            Err(ValidationError::EmptyPeaks)
        ));
    }

    #[test]
    fn mixed_mobility_peaks_get_validity_mask() {
        let spectrum = SpectrumBuilder::new(0, 0)
            .ms_level(1)
            .add_peak_with_mobility(100.0, 1.0, 0.75)
            .add_peak(200.0, 2.0)
            .add_peak_with_mobility(300.0, 3.0, 0.95)
            .build()
            .expect("valid spectrum");

        let mobility = spectrum.peaks.ion_mobility.expect("mobility present");
        assert_eq!(mobility.validity, vec![true, false, true]);
        assert_eq!(mobility.values[0], 0.75);
        assert_eq!(mobility.values[1], 0.0);
    }
}

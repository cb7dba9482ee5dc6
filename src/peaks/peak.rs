use std::cmp;
use std::fmt;
use std::hash;

use thiserror::Error;

/// The mass of a proton in unified atomic mass units, used to convert
/// between singly protonated masses and m/z coordinates.
pub const PROTON: f64 = 1.00728;

/// An error produced while constructing a [`Peak`] from raw values.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PeakError {
    #[error("m/z {0} is not a finite, non-negative number")]
    MalformedValue(f64),
}

/// A single (m/z, intensity) measurement, optionally annotated with a
/// charge state and acquisition flags.
///
/// Only the m/z coordinate is guaranteed to be meaningful. Every other
/// attribute is explicitly optional, with `None` standing in for "the
/// source format did not say".
#[derive(Debug, Default, Clone)]
pub struct Peak {
    mz: f64,
    intensity: Option<f64>,
    charge: Option<i32>,
    pub centroided: Option<bool>,
    pub monoisotopic: Option<bool>,
    pub averaged: Option<bool>,
    pub deisotoped: Option<bool>,
}

impl Peak {
    /// Create a peak at `mz` with no other attributes known.
    ///
    /// `mz` must be finite and non-negative, otherwise a
    /// [`PeakError::MalformedValue`] is returned. Decoders convert this
    /// into their own malformed-record handling.
    pub fn new(mz: f64) -> Result<Peak, PeakError> {
        if !mz.is_finite() || mz < 0.0 {
            return Err(PeakError::MalformedValue(mz));
        }
        Ok(Peak {
            mz,
            ..Default::default()
        })
    }

    /// Create a peak with a known intensity.
    pub fn with_intensity(mz: f64, intensity: f64) -> Result<Peak, PeakError> {
        let mut peak = Peak::new(mz)?;
        peak.intensity = Some(intensity);
        Ok(peak)
    }

    /// Create a peak with a known intensity and charge state.
    pub fn with_charge(mz: f64, intensity: f64, charge: i32) -> Result<Peak, PeakError> {
        let mut peak = Peak::with_intensity(mz, intensity)?;
        peak.charge = Some(charge);
        Ok(peak)
    }

    #[inline]
    pub fn mz(&self) -> f64 {
        self.mz
    }

    #[inline]
    pub fn intensity(&self) -> Option<f64> {
        self.intensity
    }

    #[inline]
    pub fn charge(&self) -> Option<i32> {
        self.charge
    }

    pub fn set_intensity(&mut self, intensity: Option<f64>) {
        self.intensity = intensity;
    }

    pub fn set_charge(&mut self, charge: Option<i32>) {
        self.charge = charge;
    }

    /// The intensity, or `0.0` when unknown. Convenient for accumulation.
    pub fn intensity_or_zero(&self) -> f64 {
        self.intensity.unwrap_or(0.0)
    }

    /// Structural comparison of every field, with m/z and intensity
    /// compared under a relative tolerance.
    pub fn approx_eq(&self, other: &Peak, rel_tol: f64) -> bool {
        close(self.mz, other.mz, rel_tol)
            && match (self.intensity, other.intensity) {
                (Some(a), Some(b)) => close(a, b, rel_tol),
                (None, None) => true,
                _ => false,
            }
            && self.charge == other.charge
            && self.centroided == other.centroided
            && self.monoisotopic == other.monoisotopic
            && self.averaged == other.averaged
            && self.deisotoped == other.deisotoped
    }
}

#[inline]
fn close(a: f64, b: f64, rel_tol: f64) -> bool {
    (a - b).abs() <= rel_tol * a.abs().max(b.abs()).max(1.0)
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Peak({}", self.mz)?;
        if let Some(intensity) = self.intensity {
            write!(f, ", {}", intensity)?;
        }
        if let Some(charge) = self.charge {
            write!(f, ", z={}", charge)?;
        }
        write!(f, ")")
    }
}

impl cmp::PartialEq<Peak> for Peak {
    fn eq(&self, other: &Peak) -> bool {
        (self.mz - other.mz).abs() <= 1e-6
            && match (self.intensity, other.intensity) {
                (Some(a), Some(b)) => (a - b).abs() <= 1e-6,
                (None, None) => true,
                _ => false,
            }
    }
}

impl cmp::PartialOrd<Peak> for Peak {
    fn partial_cmp(&self, other: &Peak) -> Option<cmp::Ordering> {
        self.mz.partial_cmp(&other.mz)
    }
}

impl hash::Hash for Peak {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        let mz_val: i64 = self.mz.round() as i64;
        mz_val.hash(state);
    }
}

/// Convert a singly protonated mass (`M+H`, as stored by DTA files) and a
/// charge state into the m/z coordinate of the ion.
pub fn protonated_mass_to_mz(mh: f64, charge: i32) -> f64 {
    (mh - PROTON) / charge as f64 + PROTON
}

/// Inverse of [`protonated_mass_to_mz`].
pub fn mz_to_protonated_mass(mz: f64, charge: i32) -> f64 {
    (mz - PROTON) * charge as f64 + PROTON
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_construction() {
        let peak = Peak::with_charge(500.5, 100.0, 2).unwrap();
        assert_eq!(peak.mz(), 500.5);
        assert_eq!(peak.intensity(), Some(100.0));
        assert_eq!(peak.charge(), Some(2));
        assert!(peak.centroided.is_none());
    }

    #[test]
    fn test_rejects_malformed_mz() {
        assert!(matches!(
            Peak::new(f64::NAN),
            Err(PeakError::MalformedValue(_))
        ));
        assert!(matches!(
            Peak::new(f64::INFINITY),
            Err(PeakError::MalformedValue(_))
        ));
        assert!(matches!(Peak::new(-1.0), Err(PeakError::MalformedValue(_))));
    }

    #[test]
    fn test_ordering() {
        let a = Peak::new(100.0).unwrap();
        let b = Peak::new(200.0).unwrap();
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn test_approx_eq() {
        let a = Peak::with_intensity(500.0, 100.0).unwrap();
        let b = Peak::with_intensity(500.0 + 1e-5, 100.0).unwrap();
        assert!(a.approx_eq(&b, 1e-6));
        let c = Peak::with_charge(500.0, 100.0, 2).unwrap();
        assert!(!a.approx_eq(&c, 1e-6));
    }

    #[test]
    fn test_protonation_round_trip() {
        let mh = 1000.5;
        let mz = protonated_mass_to_mz(mh, 2);
        assert!((mz - 500.75364).abs() < 1e-6);
        assert!((mz_to_protonated_mass(mz, 2) - mh).abs() < 1e-9);
    }
}

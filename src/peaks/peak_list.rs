use std::fmt;

use indexmap::IndexMap;

use crate::peaks::peak::Peak;

/// An ordered collection of [`Peak`]s read from, or destined for, a single
/// logical record of a peak list file.
///
/// Peaks are kept in the order the source produced them. Nothing in this
/// crate re-sorts a list behind the caller's back; use
/// [`PeakList::sort_by_mz`] when ascending m/z order is wanted.
#[derive(Debug, Default, Clone)]
pub struct PeakList {
    /// The peaks, in insertion order.
    pub peaks: Vec<Peak>,
    /// The parent ion this list was produced from, when the source is
    /// tandem data.
    pub precursor: Option<Peak>,
    /// 1 for a survey (MS) spectrum, 2 or more for fragmentation spectra,
    /// `None` when the format does not record it.
    pub tandem_level: Option<u8>,
    /// The file or stream the list came from, for diagnostics.
    pub source_name: String,
    /// Format-specific header entries that have no field of their own,
    /// e.g. MGF `TITLE` or `RTINSECONDS` lines. Codecs look up the keys
    /// they understand and ignore the rest.
    pub params: IndexMap<String, String>,
}

impl PeakList {
    pub fn new() -> PeakList {
        PeakList::default()
    }

    /// A list carrying tandem metadata: the precursor ion and its level.
    pub fn tandem(precursor: Peak, tandem_level: u8) -> PeakList {
        PeakList {
            precursor: Some(precursor),
            tandem_level: Some(tandem_level),
            ..Default::default()
        }
    }

    pub fn push(&mut self, peak: Peak) {
        self.peaks.push(peak);
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }

    /// Re-order the peaks by ascending m/z. Ties keep their relative order.
    pub fn sort_by_mz(&mut self) {
        self.peaks.sort_by(|a, b| a.mz().total_cmp(&b.mz()));
    }

    /// The most intense peak, if any peak carries an intensity.
    pub fn base_peak(&self) -> Option<&Peak> {
        self.peaks
            .iter()
            .filter(|p| p.intensity().is_some())
            .max_by(|a, b| a.intensity_or_zero().total_cmp(&b.intensity_or_zero()))
    }

    /// The summed intensity over all peaks with a known intensity.
    pub fn total_ion_current(&self) -> f64 {
        self.peaks.iter().map(|p| p.intensity_or_zero()).sum()
    }

    /// Rescale all known intensities so the base peak reads `max`.
    /// A list with no intensities is left untouched.
    pub fn normalize_intensities(&mut self, max: f64) {
        let base = match self.base_peak().and_then(|p| p.intensity()) {
            Some(base) if base > 0.0 => base,
            _ => return,
        };
        let scale = max / base;
        for peak in self.peaks.iter_mut() {
            if let Some(i) = peak.intensity() {
                peak.set_intensity(Some(i * scale));
            }
        }
    }

    /// Look up a format-specific header entry by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_str())
    }

    /// Structural comparison of the full list under a relative tolerance,
    /// covering peaks, precursor and tandem level.
    pub fn approx_eq(&self, other: &PeakList, rel_tol: f64) -> bool {
        self.peaks.len() == other.peaks.len()
            && self
                .peaks
                .iter()
                .zip(other.peaks.iter())
                .all(|(a, b)| a.approx_eq(b, rel_tol))
            && match (&self.precursor, &other.precursor) {
                (Some(a), Some(b)) => a.approx_eq(b, rel_tol),
                (None, None) => true,
                _ => false,
            }
            && self.tandem_level == other.tandem_level
    }
}

impl fmt::Display for PeakList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PeakList({} peaks", self.peaks.len())?;
        if let Some(precursor) = &self.precursor {
            write!(f, ", precursor {}", precursor)?;
        }
        if let Some(level) = self.tandem_level {
            write!(f, ", MS{}", level)?;
        }
        write!(f, ")")
    }
}

impl IntoIterator for PeakList {
    type Item = Peak;
    type IntoIter = std::vec::IntoIter<Peak>;

    fn into_iter(self) -> Self::IntoIter {
        self.peaks.into_iter()
    }
}

impl<'a> IntoIterator for &'a PeakList {
    type Item = &'a Peak;
    type IntoIter = std::slice::Iter<'a, Peak>;

    fn into_iter(self) -> Self::IntoIter {
        self.peaks.iter()
    }
}

impl Extend<Peak> for PeakList {
    fn extend<T: IntoIterator<Item = Peak>>(&mut self, iter: T) {
        self.peaks.extend(iter)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_list() -> PeakList {
        let mut list = PeakList::tandem(Peak::with_charge(500.5, 120.0, 2).unwrap(), 2);
        list.push(Peak::with_intensity(300.1, 50.0).unwrap());
        list.push(Peak::with_intensity(100.0, 10.0).unwrap());
        list.push(Peak::with_intensity(200.0, 80.0).unwrap());
        list
    }

    #[test]
    fn test_insertion_order_kept() {
        let list = make_list();
        assert_eq!(list.peaks[0].mz(), 300.1);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_sort_by_mz() {
        let mut list = make_list();
        list.sort_by_mz();
        let mzs: Vec<f64> = list.iter().map(|p| p.mz()).collect();
        assert_eq!(mzs, vec![100.0, 200.0, 300.1]);
    }

    #[test]
    fn test_summaries() {
        let list = make_list();
        assert_eq!(list.base_peak().unwrap().mz(), 200.0);
        assert!((list.total_ion_current() - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize() {
        let mut list = make_list();
        list.normalize_intensities(100.0);
        assert!((list.base_peak().unwrap().intensity().unwrap() - 100.0).abs() < 1e-9);
        assert!((list.peaks[1].intensity().unwrap() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_approx_eq_covers_precursor() {
        let a = make_list();
        let mut b = make_list();
        assert!(a.approx_eq(&b, 1e-6));
        b.precursor = None;
        assert!(!a.approx_eq(&b, 1e-6));
    }
}

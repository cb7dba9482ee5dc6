//! The in-memory data model: peaks and the lists that carry them.

pub mod peak;
pub mod peak_list;

pub use peak::{mz_to_protonated_mass, protonated_mass_to_mz, Peak, PeakError, PROTON};
pub use peak_list::PeakList;

//! `peakio` reads and writes mass spectrometry peak list file formats —
//! MGF, DTA, PKL, plain-text XY tables, mzXML and mzData — behind one
//! streaming reader/writer protocol and a filename-pattern registry that
//! dispatches a path to the codec responsible for it.
//!
//! ```no_run
//! use peakio::prelude::*;
//!
//! # fn main() -> Result<(), peakio::PeakIoError> {
//! let mut reader = peakio::io::open_path("./test/data/small.mgf")?;
//! while let Some(peak_list) = reader.next_peak_list()? {
//!     println!("{} peaks", peak_list.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod io;
pub mod peaks;

pub use crate::peaks::{Peak, PeakError, PeakList};

pub use crate::io::{FormatRegistry, PeakIoError, PeakListReader, PeakListWriter};

#[cfg(feature = "mgf")]
pub use crate::io::mgf::{MGFReader, MGFWriter};

pub use crate::io::dta::{DTAReader, DTAWriter};

/// The traits a caller needs in scope to drive readers and writers.
pub mod prelude {
    pub use crate::io::registry::{ReaderFactory, WriterFactory};
    pub use crate::io::traits::{PeakListReader, PeakListWriter};
}

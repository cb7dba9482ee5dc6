//! Reading and writing peak list file formats and the abstractions over
//! them: the streaming reader/writer protocols, the format registry that
//! dispatches names to codecs, and the decorators that stack on top.

use std::io;

use thiserror::Error;

pub(crate) mod compression;
pub mod decorators;
pub mod dta;
mod infer_format;
#[cfg(feature = "mgf")]
pub mod mgf;
pub mod pkl;
pub mod registry;
pub mod traits;
pub(crate) mod utils;
#[cfg(feature = "xml-core")]
pub mod xml;
pub mod xy;

pub use crate::io::infer_format::{
    infer_from_path, infer_from_stream, open_detected, PeakFileFormat,
};
pub use crate::io::registry::{
    create_path, default_registry, open_path, FormatRegistry, NamePattern, ReaderFactory,
    WriterFactory,
};
pub use crate::io::traits::{
    CursorState, ListCursor, ListHeader, PeakListReader, PeakListWriter, WriterCursor, WriterState,
};

pub use crate::io::decorators::{CleanupReader, CleanupWriter, GzipWriter};

#[cfg(feature = "mgf")]
pub use crate::io::mgf::{MGFReader, MGFWriter};

pub use crate::io::dta::{DTAReader, DTAWriter};
pub use crate::io::pkl::{PKLReader, PKLWriter};
pub use crate::io::xy::{XYReader, XYWriter};

#[cfg(feature = "mzxml")]
pub use crate::io::xml::mzxml::MzXMLReader;

#[cfg(feature = "mzdata-xml")]
pub use crate::io::xml::mzdata::MzDataReader;

use crate::peaks::PeakError;

/// Everything that can go wrong while resolving, decoding or encoding a
/// peak list file.
///
/// The absence of more data is never reported through this type: readers
/// signal it with `Ok(None)`, writers have nothing to signal. An `Err` is
/// always a failure.
#[derive(Debug, Error)]
pub enum PeakIoError {
    /// No registered format binding matched the given name.
    #[error("no registered format matches '{0}'")]
    UnknownFormat(String),

    /// One record inside an otherwise well-formed stream failed to parse.
    /// Whether the codec aborts or skips is a fixed, documented property
    /// of the codec.
    #[error("malformed record in {source_name} (line {line}): {message}")]
    MalformedRecord {
        source_name: String,
        line: u64,
        message: String,
    },

    /// A structural violation at the whole-file level. Always aborts the
    /// reader; no partial list is returned.
    #[error("invalid file {source_name}: {reason}")]
    InvalidFileFormat { source_name: String, reason: String },

    /// The data is structurally unrepresentable in the target format.
    /// Nothing is written for the rejected list.
    #[error("{format} cannot represent this data: {reason}")]
    IncompatibleFormat {
        format: &'static str,
        reason: String,
    },

    /// The streaming API was driven out of order.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A read or write was attempted after `close`.
    #[error("operation on a closed reader or writer")]
    UseAfterClose,

    #[error("malformed peak value: {0}")]
    MalformedValue(#[from] PeakError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PeakIoError {
    /// Helper used by codecs reporting a bad line.
    pub(crate) fn malformed<S: Into<String>, M: Into<String>>(
        source_name: S,
        line: u64,
        message: M,
    ) -> PeakIoError {
        PeakIoError::MalformedRecord {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid<S: Into<String>, M: Into<String>>(
        source_name: S,
        reason: M,
    ) -> PeakIoError {
        PeakIoError::InvalidFileFormat {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

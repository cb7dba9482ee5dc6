//! Read and write plain-text XY peak tables: bare `mz intensity` lines
//! with no header, one peak list per stream.
//!
//! Malformed-record policy: **lenient**. A line that does not parse is
//! skipped with a `log::warn!`, matching how loosely specified these
//! files are produced in the wild. This is the one codec in the crate
//! that tolerates bad lines rather than aborting.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::sync::Arc;

use log::warn;

use super::registry::{ReaderFactory, WriterFactory};
use super::traits::{ListCursor, ListHeader, PeakListReader, PeakListWriter, WriterCursor};
use super::utils::LineSource;
use super::PeakIoError;
use crate::peaks::Peak;

/// A parser for headerless `mz intensity` text files. The whole stream is
/// one peak list at tandem level 1 with no precursor.
pub struct XYReader<R: io::Read> {
    lines: LineSource<R>,
    cursor: ListCursor,
    started: bool,
}

impl XYReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<XYReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(XYReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> XYReader<R> {
    pub fn new(handle: R) -> XYReader<R> {
        XYReader::with_source_name(handle, "<xy stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> XYReader<R> {
        XYReader {
            lines: LineSource::new(handle),
            cursor: ListCursor::new(source_name),
            started: false,
        }
    }
}

impl<R: io::Read> PeakListReader for XYReader<R> {
    fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        &mut self.cursor
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        if self.started {
            return Ok(None);
        }
        self.started = true;
        Ok(Some(ListHeader {
            tandem_level: Some(1),
            ..Default::default()
        }))
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        loop {
            let line = match self.lines.next_line()? {
                None => return Ok(None),
                Some(line) => line,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut parts = trimmed.split_ascii_whitespace();
            let parsed = match (parts.next(), parts.next()) {
                (Some(mz_token), Some(intensity_token)) => mz_token
                    .parse::<f64>()
                    .ok()
                    .zip(intensity_token.parse::<f64>().ok()),
                _ => None,
            };
            match parsed.and_then(|(mz, intensity)| Peak::with_intensity(mz, intensity).ok()) {
                Some(peak) => return Ok(Some(peak)),
                None => {
                    warn!(
                        "{}:{}: skipping unparseable line '{}'",
                        self.cursor.source_name(),
                        self.lines.line_no(),
                        trimmed
                    );
                }
            }
        }
    }
}

/// A writer for headerless `mz intensity` text files. The format can hold
/// exactly one peak list; starting a second fails with
/// [`PeakIoError::IncompatibleFormat`](crate::io::PeakIoError::IncompatibleFormat).
/// Precursor metadata, which the format cannot express, is dropped.
pub struct XYWriter<W: io::Write> {
    handle: io::BufWriter<W>,
    cursor: WriterCursor,
    wrote_list: bool,
}

impl XYWriter<fs::File> {
    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<XYWriter<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::create(path)?;
        Ok(XYWriter::with_target_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<W: io::Write> XYWriter<W> {
    pub fn new(handle: W) -> XYWriter<W> {
        XYWriter::with_target_name(handle, "<xy stream>")
    }

    pub fn with_target_name<S: Into<String>>(handle: W, target_name: S) -> XYWriter<W> {
        XYWriter {
            handle: io::BufWriter::new(handle),
            cursor: WriterCursor::new(target_name),
            wrote_list: false,
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: io::Write> PeakListWriter for XYWriter<W> {
    fn writer_cursor(&self) -> &WriterCursor {
        &self.cursor
    }

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor {
        &mut self.cursor
    }

    fn begin_list(&mut self, _header: &ListHeader) -> Result<(), PeakIoError> {
        if self.wrote_list {
            return Err(PeakIoError::IncompatibleFormat {
                format: "XY",
                reason: "the format holds a single peak list per file".into(),
            });
        }
        self.wrote_list = true;
        Ok(())
    }

    fn put_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError> {
        writeln!(self.handle, "{} {}", peak.mz(), peak.intensity_or_zero())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PeakIoError> {
        self.handle.flush()?;
        Ok(())
    }
}

/// Registry factory for the XY text codec.
pub struct XYFormat;

impl ReaderFactory for XYFormat {
    fn format_name(&self) -> &'static str {
        "XY"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(XYReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(XYReader::with_source_name(stream, source_name)))
    }
}

impl WriterFactory for XYFormat {
    fn format_name(&self) -> &'static str {
        "XY"
    }

    fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
        Ok(Box::new(XYWriter::create_path(path)?))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(XYFormat)
}

pub(crate) fn writer_factory() -> Arc<dyn WriterFactory> {
    Arc::new(XYFormat)
}

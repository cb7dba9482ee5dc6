//! Read and write Micromass PKL files.
//!
//! Each record opens with a `mz,intensity,charge` line describing the
//! precursor ion, followed by `mz intensity` peak lines; a blank line
//! separates records. Readers accept commas or whitespace between
//! columns; writers emit the comma form for the header.
//!
//! Malformed-record policy: **strict**; a bad line aborts the decode.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::sync::Arc;

use super::registry::{ReaderFactory, WriterFactory};
use super::traits::{
    ListCursor, ListHeader, PeakListReader, PeakListWriter, WriterCursor, WriterState,
};
use super::utils::LineSource;
use super::PeakIoError;
use crate::peaks::{Peak, PeakList};

fn split_columns(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
}

/// A PKL file parser.
pub struct PKLReader<R: io::Read> {
    lines: LineSource<R>,
    cursor: ListCursor,
}

impl PKLReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<PKLReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(PKLReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> PKLReader<R> {
    pub fn new(handle: R) -> PKLReader<R> {
        PKLReader::with_source_name(handle, "<pkl stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> PKLReader<R> {
        PKLReader {
            lines: LineSource::new(handle),
            cursor: ListCursor::new(source_name),
        }
    }

    fn malformed(&self, message: String) -> PeakIoError {
        PeakIoError::malformed(self.cursor.source_name(), self.lines.line_no(), message)
    }

    fn parse_float(&self, token: &str, what: &str) -> Result<f64, PeakIoError> {
        token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable {what} '{token}'")))
    }
}

impl<R: io::Read> PeakListReader for PKLReader<R> {
    fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        &mut self.cursor
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        let line = loop {
            match self.lines.next_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
            }
        };
        let mut columns = split_columns(&line);
        let (mz_token, intensity_token, charge_token) =
            match (columns.next(), columns.next(), columns.next(), columns.next()) {
                (Some(mz), Some(intensity), Some(charge), None) => (mz, intensity, charge),
                _ => {
                    return Err(self.malformed(format!(
                        "expected 'mz,intensity,charge' header, found '{}'",
                        line.trim()
                    )))
                }
            };
        let mz = self.parse_float(mz_token, "precursor m/z")?;
        let intensity = self.parse_float(intensity_token, "precursor intensity")?;
        let charge: i32 = charge_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable precursor charge '{charge_token}'")))?;
        Ok(Some(ListHeader::tandem(
            Peak::with_charge(mz, intensity, charge)?,
            2,
        )))
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        let line = match self.lines.next_line()? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => return Ok(None),
            Some(line) => line,
        };
        let mut columns = split_columns(&line);
        let (mz_token, intensity_token) = match (columns.next(), columns.next()) {
            (Some(mz), Some(intensity)) => (mz, intensity),
            _ => {
                return Err(self.malformed(format!(
                    "expected 'mz intensity' peak line, found '{}'",
                    line.trim()
                )))
            }
        };
        let mz = self.parse_float(mz_token, "m/z")?;
        let intensity = self.parse_float(intensity_token, "intensity")?;
        Ok(Some(Peak::with_intensity(mz, intensity)?))
    }
}

/// A PKL writer. Requires a precursor with a known charge state; its
/// intensity serializes as `0` when unknown, as do peak intensities.
pub struct PKLWriter<W: io::Write> {
    handle: io::BufWriter<W>,
    cursor: WriterCursor,
}

impl PKLWriter<fs::File> {
    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<PKLWriter<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::create(path)?;
        Ok(PKLWriter::with_target_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<W: io::Write> PKLWriter<W> {
    pub fn new(handle: W) -> PKLWriter<W> {
        PKLWriter::with_target_name(handle, "<pkl stream>")
    }

    pub fn with_target_name<S: Into<String>>(handle: W, target_name: S) -> PKLWriter<W> {
        PKLWriter {
            handle: io::BufWriter::new(handle),
            cursor: WriterCursor::new(target_name),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().map_err(|e| e.into_error())
    }
}

fn require_charged_precursor(precursor: Option<&Peak>) -> Result<&Peak, PeakIoError> {
    match precursor {
        Some(p) if p.charge().is_some() => Ok(p),
        Some(_) => Err(PeakIoError::IncompatibleFormat {
            format: "PKL",
            reason: "the precursor carries no charge state".into(),
        }),
        None => Err(PeakIoError::IncompatibleFormat {
            format: "PKL",
            reason: "a PKL record requires a precursor ion".into(),
        }),
    }
}

impl<W: io::Write> PeakListWriter for PKLWriter<W> {
    fn writer_cursor(&self) -> &WriterCursor {
        &self.cursor
    }

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor {
        &mut self.cursor
    }

    fn check_compatible(&self, list: &PeakList) -> Result<(), PeakIoError> {
        require_charged_precursor(list.precursor.as_ref()).map(|_| ())
    }

    fn begin_list(&mut self, header: &ListHeader) -> Result<(), PeakIoError> {
        let precursor = require_charged_precursor(header.precursor.as_ref())?;
        if self.cursor.state() == WriterState::InList {
            writeln!(self.handle)?;
        }
        writeln!(
            self.handle,
            "{},{},{}",
            precursor.mz(),
            precursor.intensity_or_zero(),
            precursor.charge().unwrap_or_default(),
        )?;
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

/// Registry factory for the PKL codec.
pub struct PKLFormat;

impl ReaderFactory for PKLFormat {
    fn format_name(&self) -> &'static str {
        "PKL"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(PKLReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(PKLReader::with_source_name(stream, source_name)))
    }
}

impl WriterFactory for PKLFormat {
    fn format_name(&self) -> &'static str {
        "PKL"
    }

    fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
        Ok(Box::new(PKLWriter::create_path(path)?))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(PKLFormat)
}

pub(crate) fn writer_factory() -> Arc<dyn WriterFactory> {
    Arc::new(PKLFormat)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_records() {
        let data = "500.5,1200.0,2\n100.0 10\n200.0 20\n\n600.25,800,3\n150.5 5\n";
        let mut reader = PKLReader::new(data.as_bytes());
        let first = reader.next_peak_list().unwrap().unwrap();
        let precursor = first.precursor.as_ref().unwrap();
        assert_eq!(precursor.mz(), 500.5);
        assert_eq!(precursor.intensity(), Some(1200.0));
        assert_eq!(precursor.charge(), Some(2));
        assert_eq!(first.len(), 2);
        let second = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(second.precursor.as_ref().unwrap().charge(), Some(3));
        assert_eq!(second.len(), 1);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_whitespace_separated_header() {
        let data = "500.5 1200.0 2\n100.0 10\n";
        let mut reader = PKLReader::new(data.as_bytes());
        let list = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(list.precursor.as_ref().unwrap().charge(), Some(2));
    }

    #[test]
    fn test_round_trip() {
        let data = "500.5,1200.0,2\n100.0 10\n200.0 20\n\n600.25,800,3\n150.5 5\n";
        let mut reader = PKLReader::new(data.as_bytes());
        let mut writer = PKLWriter::new(Vec::new());
        let mut originals = Vec::new();
        while let Some(list) = reader.next_peak_list().unwrap() {
            writer.write(&list).unwrap();
            originals.push(list);
        }
        writer.close().unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reread = PKLReader::new(bytes.as_slice());
        for original in &originals {
            let copy = reread.next_peak_list().unwrap().unwrap();
            assert!(original.approx_eq(&copy, 1e-6));
        }
        assert!(reread.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_header_requires_three_columns() {
        let mut reader = PKLReader::new("500.5,1200.0\n".as_bytes());
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_write_requires_charged_precursor() {
        let mut writer = PKLWriter::new(Vec::new());
        let mut list = PeakList::new();
        list.push(Peak::with_intensity(100.0, 1.0).unwrap());
        assert!(matches!(
            writer.write(&list),
            Err(PeakIoError::IncompatibleFormat { .. })
        ));
        writer.close().unwrap();
        assert!(writer.into_inner().unwrap().is_empty());
    }
}

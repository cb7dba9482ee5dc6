//! Read and write Sequest DTA files.
//!
//! A DTA record opens with a `M+H charge` line — the singly protonated
//! parent mass, not the parent m/z — followed by `mz intensity` peak
//! lines. A blank line separates records when several share one stream.
//! On read, the parent mass is converted to the precursor's m/z
//! coordinate; on write, the conversion runs in reverse.
//!
//! Malformed-record policy: **strict**; a bad line aborts the decode.
//!
//! Writing requires a precursor with a known charge state. Data without
//! one fails with
//! [`PeakIoError::IncompatibleFormat`](crate::io::PeakIoError::IncompatibleFormat);
//! the writer never guesses charges on the caller's behalf.

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
use crate::peaks::{mz_to_protonated_mass, protonated_mass_to_mz, Peak, PeakList};

/// A DTA file parser.
pub struct DTAReader<R: io::Read> {
    lines: LineSource<R>,
    cursor: ListCursor,
}

impl DTAReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<DTAReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(DTAReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> DTAReader<R> {
    pub fn new(handle: R) -> DTAReader<R> {
        DTAReader::with_source_name(handle, "<dta stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> DTAReader<R> {
        DTAReader {
            lines: LineSource::new(handle),
            cursor: ListCursor::new(source_name),
        }
    }

    fn malformed(&self, message: String) -> PeakIoError {
        PeakIoError::malformed(self.cursor.source_name(), self.lines.line_no(), message)
    }
}

impl<R: io::Read> PeakListReader for DTAReader<R> {
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
        let mut parts = line.split_ascii_whitespace();
        let (mh_token, charge_token) = match (parts.next(), parts.next(), parts.next()) {
            (Some(mh), Some(charge), None) => (mh, charge),
            _ => {
                return Err(self.malformed(format!(
                    "expected 'parent-mass charge' header, found '{}'",
                    line.trim()
                )))
            }
        };
        let mh: f64 = mh_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable parent mass '{mh_token}'")))?;
        let charge: i32 = charge_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable parent charge '{charge_token}'")))?;

        let mut precursor = Peak::new(protonated_mass_to_mz(mh, charge))?;
        precursor.set_charge(Some(charge));
        Ok(Some(ListHeader::tandem(precursor, 2)))
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        let line = match self.lines.next_line()? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => return Ok(None),
            Some(line) => line,
        };
        let mut parts = line.split_ascii_whitespace();
        let (mz_token, intensity_token) = match (parts.next(), parts.next()) {
            (Some(mz), Some(intensity)) => (mz, intensity),
            _ => {
                return Err(self.malformed(format!(
                    "expected 'mz intensity' peak line, found '{}'",
                    line.trim()
                )))
            }
        };
        let mz: f64 = mz_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable m/z '{mz_token}'")))?;
        let intensity: f64 = intensity_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable intensity '{intensity_token}'")))?;
        Ok(Some(Peak::with_intensity(mz, intensity)?))
    }
}

fn require_charged_precursor(
    precursor: Option<&Peak>,
) -> Result<(f64, i32), PeakIoError> {
    match precursor {
        Some(p) => match p.charge() {
            Some(charge) => Ok((p.mz(), charge)),
            None => Err(PeakIoError::IncompatibleFormat {
                format: "DTA",
                reason: "the precursor carries no charge state".into(),
            }),
        },
        None => Err(PeakIoError::IncompatibleFormat {
            format: "DTA",
            reason: "a DTA record requires a precursor ion".into(),
        }),
    }
}

/// A DTA writer. Records are separated by a blank line, written when the
/// following record starts. Unknown peak intensities serialize as `0`.
pub struct DTAWriter<W: io::Write> {
    handle: io::BufWriter<W>,
    cursor: WriterCursor,
}

impl DTAWriter<fs::File> {
    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<DTAWriter<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::create(path)?;
        Ok(DTAWriter::with_target_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<W: io::Write> DTAWriter<W> {
    pub fn new(handle: W) -> DTAWriter<W> {
        DTAWriter::with_target_name(handle, "<dta stream>")
    }

    pub fn with_target_name<S: Into<String>>(handle: W, target_name: S) -> DTAWriter<W> {
        DTAWriter {
            handle: io::BufWriter::new(handle),
            cursor: WriterCursor::new(target_name),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: io::Write> PeakListWriter for DTAWriter<W> {
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
        let (mz, charge) = require_charged_precursor(header.precursor.as_ref())?;
        if self.cursor.state() == WriterState::InList {
            writeln!(self.handle)?;
        }
        writeln!(self.handle, "{} {}", mz_to_protonated_mass(mz, charge), charge)?;
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

/// Registry factory for the DTA codec.
pub struct DTAFormat;

impl ReaderFactory for DTAFormat {
    fn format_name(&self) -> &'static str {
        "DTA"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(DTAReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(DTAReader::with_source_name(stream, source_name)))
    }
}

impl WriterFactory for DTAFormat {
    fn format_name(&self) -> &'static str {
        "DTA"
    }

    fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
        Ok(Box::new(DTAWriter::create_path(path)?))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(DTAFormat)
}

pub(crate) fn writer_factory() -> Arc<dyn WriterFactory> {
    Arc::new(DTAFormat)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_single_record() {
        let data = "1000.5 2\n500.2 100\n300.1 50\n\n";
        let mut reader = DTAReader::new(data.as_bytes());
        let list = reader.next_peak_list().unwrap().unwrap();
        let precursor = list.precursor.as_ref().unwrap();
        assert!((precursor.mz() - 500.75364).abs() < 1e-3);
        assert_eq!(precursor.charge(), Some(2));
        assert_eq!(list.len(), 2);
        assert_eq!(list.peaks[0].mz(), 500.2);
        assert_eq!(list.peaks[0].intensity(), Some(100.0));
        assert_eq!(list.peaks[1].mz(), 300.1);
        assert_eq!(list.peaks[1].intensity(), Some(50.0));
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_read_concatenated_records() {
        let data = "1000.5 2\n500.2 100\n\n900.25 1\n450.0 10\n451.0 20\n";
        let mut reader = DTAReader::new(data.as_bytes());
        let first = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(first.len(), 1);
        let second = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(second.len(), 2);
        // Charge 1: the parent mass is already the m/z.
        assert!((second.precursor.as_ref().unwrap().mz() - 900.25).abs() < 1e-9);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_malformed_header_is_strict() {
        let mut reader = DTAReader::new("garbage here too many columns\n".as_bytes());
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let data = "1000.5 2\n500.2 100\n300.1 50\n\n1200.75 3\n400.0 25\n";
        let mut reader = DTAReader::new(data.as_bytes());
        let mut writer = DTAWriter::new(Vec::new());
        let mut originals = Vec::new();
        while let Some(list) = reader.next_peak_list().unwrap() {
            writer.write(&list).unwrap();
            originals.push(list);
        }
        writer.close().unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reread = DTAReader::new(bytes.as_slice());
        for original in &originals {
            let copy = reread.next_peak_list().unwrap().unwrap();
            assert!(original.approx_eq(&copy, 1e-6));
        }
        assert!(reread.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_write_requires_charged_precursor() {
        let mut writer = DTAWriter::new(Vec::new());

        let mut no_precursor = PeakList::new();
        no_precursor.push(Peak::with_intensity(100.0, 1.0).unwrap());
        assert!(matches!(
            writer.write(&no_precursor),
            Err(PeakIoError::IncompatibleFormat { .. })
        ));

        let mut uncharged = PeakList::new();
        uncharged.precursor = Some(Peak::with_intensity(500.0, 1.0).unwrap());
        assert!(matches!(
            writer.write(&uncharged),
            Err(PeakIoError::IncompatibleFormat { .. })
        ));

        // Nothing was emitted for the rejected lists.
        writer.close().unwrap();
        assert!(writer.into_inner().unwrap().is_empty());
    }
}

//! Read and write [MGF](https://www.matrixscience.com/help/data_file_help.html#GEN)
//! (Mascot Generic Format) files.
//!
//! Malformed-record policy: **strict**. A header or peak line that does
//! not parse aborts the decode with
//! [`PeakIoError::MalformedRecord`](crate::io::PeakIoError::MalformedRecord).
//!
//! **Requires the `mgf` feature, enabled by default.**
#![cfg(feature = "mgf")]

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
use crate::peaks::Peak;

/// True when the buffer looks like the head of an MGF document.
pub fn is_mgf(buf: &[u8]) -> bool {
    let needle = b"BEGIN IONS";
    buf.windows(needle.len()).any(|window| window == needle)
}

/// Parse a `CHARGE=` style token: `2`, `2+`, `3-`.
fn parse_charge(token: &str) -> Option<i32> {
    let token = token.trim();
    if let Some(stripped) = token.strip_suffix('+') {
        stripped.parse::<i32>().ok()
    } else if let Some(stripped) = token.strip_suffix('-') {
        stripped.parse::<i32>().ok().map(|z| -z)
    } else {
        token.parse::<i32>().ok()
    }
}

/// An MGF file parser. One `BEGIN IONS`/`END IONS` block becomes one
/// [`PeakList`](crate::peaks::PeakList); `PEPMASS` and `CHARGE` populate
/// the precursor, every other `KEY=value` line lands in the list's
/// `params` map under its original key.
pub struct MGFReader<R: io::Read> {
    lines: LineSource<R>,
    cursor: ListCursor,
    /// Set once the current block's `END IONS` has been consumed.
    list_terminated: bool,
}

impl MGFReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<MGFReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(MGFReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> MGFReader<R> {
    pub fn new(handle: R) -> MGFReader<R> {
        MGFReader::with_source_name(handle, "<mgf stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> MGFReader<R> {
        MGFReader {
            lines: LineSource::new(handle),
            cursor: ListCursor::new(source_name),
            list_terminated: false,
        }
    }

    fn malformed(&self, message: String) -> PeakIoError {
        PeakIoError::malformed(self.cursor.source_name(), self.lines.line_no(), message)
    }

    fn parse_peak_line(&self, line: &str) -> Result<Peak, PeakIoError> {
        let mut it = line.split_ascii_whitespace();
        let mz_token = it.next().unwrap_or_default();
        let mz: f64 = mz_token
            .parse()
            .map_err(|_| self.malformed(format!("unparseable m/z '{mz_token}'")))?;
        let mut peak = Peak::new(mz)?;
        if let Some(intensity_token) = it.next() {
            let intensity: f64 = intensity_token
                .parse()
                .map_err(|_| self.malformed(format!("unparseable intensity '{intensity_token}'")))?;
            peak.set_intensity(Some(intensity));
        }
        if let Some(charge_token) = it.next() {
            peak.set_charge(Some(parse_charge(charge_token).ok_or_else(|| {
                self.malformed(format!("unparseable charge '{charge_token}'"))
            })?));
        }
        Ok(peak)
    }
}

impl<R: io::Read> PeakListReader for MGFReader<R> {
    fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        &mut self.cursor
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        // Skip to the next block; anything outside BEGIN/END IONS is
        // file-level commentary MGF consumers ignore.
        loop {
            match self.lines.next_line()? {
                None => return Ok(None),
                Some(line) if line.trim() == "BEGIN IONS" => break,
                Some(_) => {}
            }
        }
        self.list_terminated = false;

        let mut header = ListHeader {
            tandem_level: Some(2),
            ..Default::default()
        };
        let mut precursor_mz: Option<f64> = None;
        let mut precursor_intensity: Option<f64> = None;
        let mut precursor_charge: Option<i32> = None;

        loop {
            let raw = match self.lines.next_line()? {
                Some(raw) => raw,
                None => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        "end of file inside an ion block header",
                    ))
                }
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == "END IONS" {
                self.list_terminated = true;
                break;
            }
            if let Some((key, value)) = line.split_once('=') {
                match key {
                    "PEPMASS" => {
                        let mut parts = value.split_ascii_whitespace();
                        let mz_token = parts.next().unwrap_or_default();
                        precursor_mz = Some(mz_token.parse().map_err(|_| {
                            self.malformed(format!("unparseable PEPMASS '{value}'"))
                        })?);
                        if let Some(token) = parts.next() {
                            precursor_intensity = Some(token.parse().map_err(|_| {
                                self.malformed(format!("unparseable PEPMASS intensity '{token}'"))
                            })?);
                        }
                    }
                    "CHARGE" => {
                        precursor_charge = Some(parse_charge(value).ok_or_else(|| {
                            self.malformed(format!("unparseable CHARGE '{value}'"))
                        })?);
                    }
                    _ => {
                        header.params.insert(key.to_string(), value.to_string());
                    }
                }
            } else if line.starts_with(|c: char| c.is_ascii_digit()) {
                // First peak line; the header section ends here.
                self.lines.push_back(raw);
                break;
            } else {
                return Err(self.malformed(format!("unparseable header line '{line}'")));
            }
        }

        if let Some(mz) = precursor_mz {
            let mut precursor = Peak::new(mz)?;
            precursor.set_intensity(precursor_intensity);
            precursor.set_charge(precursor_charge);
            header.precursor = Some(precursor);
        }
        Ok(Some(header))
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        if self.list_terminated {
            return Ok(None);
        }
        loop {
            let raw = match self.lines.next_line()? {
                Some(raw) => raw,
                None => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        "end of file before END IONS",
                    ))
                }
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == "END IONS" {
                self.list_terminated = true;
                return Ok(None);
            }
            return self.parse_peak_line(line).map(Some);
        }
    }
}

/// An MGF writer. `END IONS` for a list is emitted when the next list
/// starts or at `close`, whichever comes first.
pub struct MGFWriter<W: io::Write> {
    handle: io::BufWriter<W>,
    cursor: WriterCursor,
}

impl MGFWriter<fs::File> {
    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<MGFWriter<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::create(path)?;
        Ok(MGFWriter::with_target_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<W: io::Write> MGFWriter<W> {
    pub fn new(handle: W) -> MGFWriter<W> {
        MGFWriter::with_target_name(handle, "<mgf stream>")
    }

    pub fn with_target_name<S: Into<String>>(handle: W, target_name: S) -> MGFWriter<W> {
        MGFWriter {
            handle: io::BufWriter::new(handle),
            cursor: WriterCursor::new(target_name),
        }
    }

    /// Consume the writer and hand back the underlying stream. Intended
    /// for in-memory targets in tests.
    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().map_err(|e| e.into_error())
    }

    fn write_terminator(&mut self) -> Result<(), PeakIoError> {
        writeln!(self.handle, "END IONS")?;
        writeln!(self.handle)?;
        Ok(())
    }
}

impl<W: io::Write> PeakListWriter for MGFWriter<W> {
    fn writer_cursor(&self) -> &WriterCursor {
        &self.cursor
    }

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor {
        &mut self.cursor
    }

    fn begin_list(&mut self, header: &ListHeader) -> Result<(), PeakIoError> {
        if self.cursor.state() == WriterState::InList {
            self.write_terminator()?;
        }
        writeln!(self.handle, "BEGIN IONS")?;
        if let Some(title) = header.params.get("TITLE") {
            writeln!(self.handle, "TITLE={}", title)?;
        }
        if let Some(precursor) = &header.precursor {
            match precursor.intensity() {
                Some(intensity) => {
                    writeln!(self.handle, "PEPMASS={} {}", precursor.mz(), intensity)?
                }
                None => writeln!(self.handle, "PEPMASS={}", precursor.mz())?,
            }
            if let Some(charge) = precursor.charge() {
                if charge < 0 {
                    writeln!(self.handle, "CHARGE={}-", -charge)?;
                } else {
                    writeln!(self.handle, "CHARGE={}+", charge)?;
                }
            }
        }
        for (key, value) in header.params.iter().filter(|(k, _)| *k != "TITLE") {
            writeln!(self.handle, "{}={}", key, value)?;
        }
        Ok(())
    }

    fn put_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError> {
        write!(self.handle, "{}", peak.mz())?;
        if let Some(intensity) = peak.intensity() {
            write!(self.handle, "\t{}", intensity)?;
            if let Some(charge) = peak.charge() {
                if charge < 0 {
                    write!(self.handle, "\t{}-", -charge)?;
                } else {
                    write!(self.handle, "\t{}+", charge)?;
                }
            }
        }
        writeln!(self.handle)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PeakIoError> {
        if self.cursor.state() == WriterState::InList {
            self.write_terminator()?;
        }
        self.handle.flush()?;
        Ok(())
    }
}

/// Registry factory for the MGF codec.
pub struct MGFFormat;

impl ReaderFactory for MGFFormat {
    fn format_name(&self) -> &'static str {
        "MGF"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MGFReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MGFReader::with_source_name(stream, source_name)))
    }
}

impl WriterFactory for MGFFormat {
    fn format_name(&self) -> &'static str {
        "MGF"
    }

    fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
        Ok(Box::new(MGFWriter::create_path(path)?))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(MGFFormat)
}

pub(crate) fn writer_factory() -> Arc<dyn WriterFactory> {
    Arc::new(MGFFormat)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::PeakList;

    const TWO_SPECTRA: &str = "BEGIN IONS\nTITLE=scan=1\nPEPMASS=500.5\nCHARGE=2+\n100.0\t10\n200.0\t20\nEND IONS\nBEGIN IONS\nPEPMASS=600.25 1500\nCHARGE=3+\n150.5\t5\nEND IONS\n";

    #[test]
    fn test_read_single_block() {
        let data = "BEGIN IONS\nPEPMASS=500.5\nCHARGE=2+\n100.0\t10\n200.0\t20\nEND IONS\n";
        let mut reader = MGFReader::new(data.as_bytes());
        let list = reader.next_peak_list().unwrap().unwrap();
        let precursor = list.precursor.as_ref().unwrap();
        assert_eq!(precursor.mz(), 500.5);
        assert_eq!(precursor.charge(), Some(2));
        assert_eq!(list.tandem_level, Some(2));
        assert_eq!(list.len(), 2);
        assert_eq!(list.peaks[0].mz(), 100.0);
        assert_eq!(list.peaks[0].intensity(), Some(10.0));
        assert_eq!(list.peaks[1].mz(), 200.0);
        assert_eq!(list.peaks[1].intensity(), Some(20.0));
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_read_title_and_params() {
        let mut reader = MGFReader::new(TWO_SPECTRA.as_bytes());
        let first = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(first.param("TITLE"), Some("scan=1"));
        let second = reader.next_peak_list().unwrap().unwrap();
        let precursor = second.precursor.as_ref().unwrap();
        assert_eq!(precursor.mz(), 600.25);
        assert_eq!(precursor.intensity(), Some(1500.0));
        assert_eq!(precursor.charge(), Some(3));
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_streaming_matches_batch() {
        let mut batch = MGFReader::new(TWO_SPECTRA.as_bytes());
        let mut expected = Vec::new();
        while let Some(list) = batch.next_peak_list().unwrap() {
            expected.push(list);
        }

        let mut streaming = MGFReader::new(TWO_SPECTRA.as_bytes());
        let mut rebuilt: Vec<PeakList> = Vec::new();
        loop {
            if streaming.is_start_of_peak_list() {
                let mut list = PeakList::new();
                list.precursor = streaming.precursor().cloned();
                list.tandem_level = streaming.tandem_level();
                rebuilt.push(list);
            }
            match streaming.next_peak().unwrap() {
                Some(peak) => rebuilt.last_mut().unwrap().push(peak),
                None => {
                    if !streaming.is_start_of_peak_list() {
                        break;
                    }
                }
            }
        }

        assert_eq!(expected.len(), rebuilt.len());
        for (a, b) in expected.iter().zip(rebuilt.iter()) {
            assert!(a.approx_eq(b, 1e-9));
        }
    }

    #[test]
    fn test_lookahead_across_boundary() {
        // List one holds exactly one peak; probing must not lose it.
        let mut reader = MGFReader::new(
            "BEGIN IONS\nPEPMASS=400.0\n111.0\t1\nEND IONS\nBEGIN IONS\nPEPMASS=500.0\n222.0\t2\nEND IONS\n"
                .as_bytes(),
        );
        assert!(reader.has_next_peak().unwrap());
        assert!(reader.has_next_peak().unwrap());
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 111.0);
        assert!(!reader.has_next_peak().unwrap());
        assert!(reader.is_start_of_peak_list());
        assert_eq!(reader.precursor().unwrap().mz(), 500.0);
        assert_eq!(reader.next_peak().unwrap().unwrap().mz(), 222.0);
    }

    #[test]
    fn test_empty_block() {
        let mut reader =
            MGFReader::new("BEGIN IONS\nPEPMASS=400.0\nEND IONS\n".as_bytes());
        let list = reader.next_peak_list().unwrap().unwrap();
        assert!(list.is_empty());
        assert_eq!(list.precursor.as_ref().unwrap().mz(), 400.0);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_malformed_peak_line_is_strict() {
        let mut reader = MGFReader::new(
            "BEGIN IONS\nPEPMASS=400.0\nnot-a-number 10\nEND IONS\n".as_bytes(),
        );
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_truncated_block() {
        let mut reader = MGFReader::new("BEGIN IONS\nPEPMASS=400.0\n100.0 1\n".as_bytes());
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::InvalidFileFormat { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut reader = MGFReader::new(TWO_SPECTRA.as_bytes());
        let mut writer = MGFWriter::new(Vec::new());
        let mut originals = Vec::new();
        while let Some(list) = reader.next_peak_list().unwrap() {
            writer.write(&list).unwrap();
            originals.push(list);
        }
        writer.close().unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reread = MGFReader::new(bytes.as_slice());
        for original in &originals {
            let copy = reread.next_peak_list().unwrap().unwrap();
            assert!(original.approx_eq(&copy, 1e-6));
            assert_eq!(original.param("TITLE"), copy.param("TITLE"));
        }
        assert!(reread.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_streaming_writer_terminates_lists() {
        let mut writer = MGFWriter::new(Vec::new());
        writer
            .start_peak_list(Some(&Peak::with_charge(500.0, 1.0, 2).unwrap()), Some(2))
            .unwrap();
        writer
            .write_peak(&Peak::with_intensity(100.0, 5.0).unwrap())
            .unwrap();
        writer.start_peak_list(None, Some(2)).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.matches("BEGIN IONS").count(), 2);
        assert_eq!(text.matches("END IONS").count(), 2);
    }

    #[test]
    fn test_write_peak_without_list_is_protocol_violation() {
        let mut writer = MGFWriter::new(Vec::new());
        assert!(matches!(
            writer.write_peak(&Peak::new(100.0).unwrap()),
            Err(PeakIoError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_is_mgf() {
        assert!(is_mgf(b"# comment\nBEGIN IONS\n"));
        assert!(!is_mgf(b"100.0 200.0\n"));
    }
}

//! Read mzXML documents.
//!
//! Decoding is read-only: mzXML is an interchange format this crate
//! consumes but does not produce. One `<scan>` element becomes one peak
//! list; the base64 `<peaks>` payload is decoded per its declared
//! precision, byte order and compression, and nested MS² scans are
//! flattened into the scan sequence in document order.
//!
//! Malformed-record policy: **strict**. XML gives no way to resynchronize
//! on a record boundary after bad content, so any structural problem
//! aborts with
//! [`PeakIoError::InvalidFileFormat`](crate::io::PeakIoError::InvalidFileFormat).
//!
//! **Requires the `mzxml` feature, enabled by default.**

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::super::registry::{ContentProbe, ReaderFactory};
use super::super::traits::{ListCursor, ListHeader, PeakListReader};
use super::super::PeakIoError;
use super::{decode_base64, decode_floats, decompress_zlib, read_declaration_from_path};
use crate::peaks::Peak;

/// How one `<peaks>` element says its payload is packed.
#[derive(Debug, Clone)]
struct PeaksLayout {
    precision: u8,
    big_endian: bool,
    zlib: bool,
    intensity_first: bool,
}

impl Default for PeaksLayout {
    fn default() -> PeaksLayout {
        PeaksLayout {
            precision: 32,
            big_endian: true,
            zlib: false,
            intensity_first: false,
        }
    }
}

/// One step of walking a `<scan>` body, lifted out of the event loop so
/// the borrow of the parse buffer ends before the step is acted on.
enum ScanStep {
    Precursor(BytesStart<'static>),
    Peaks(BytesStart<'static>),
    EmptyPeaks,
    EndScan,
    Skip,
    Eof,
    Fail(String),
}

/// An mzXML document parser.
pub struct MzXMLReader<R: io::Read> {
    xml: Reader<BufReader<R>>,
    buf: Vec<u8>,
    cursor: ListCursor,
    /// Peaks of the current scan, decoded in one piece because the
    /// format stores them as a single base64 blob.
    buffered: VecDeque<Peak>,
}

impl MzXMLReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<MzXMLReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(MzXMLReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> MzXMLReader<R> {
    pub fn new(handle: R) -> MzXMLReader<R> {
        MzXMLReader::with_source_name(handle, "<mzxml stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> MzXMLReader<R> {
        let mut xml = Reader::from_reader(BufReader::new(handle));
        xml.trim_text(true);
        MzXMLReader {
            xml,
            buf: Vec::new(),
            cursor: ListCursor::new(source_name),
            buffered: VecDeque::new(),
        }
    }

    fn invalid<M: Into<String>>(&self, reason: M) -> PeakIoError {
        PeakIoError::invalid(self.cursor.source_name(), reason)
    }

    fn attribute(&self, element: &BytesStart, name: &[u8]) -> Result<Option<String>, PeakIoError> {
        for attr in element.attributes() {
            let attr = attr.map_err(|err| self.invalid(err.to_string()))?;
            if attr.key.as_ref() == name {
                let value = attr
                    .unescape_value()
                    .map_err(|err| self.invalid(err.to_string()))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    /// Collect the character data of the element whose `Start` event was
    /// just consumed, up to its matching end tag.
    fn element_text(&mut self, name: &[u8]) -> Result<String, PeakIoError> {
        let mut text = String::new();
        loop {
            self.buf.clear();
            match self.xml.read_event_into(&mut self.buf) {
                Ok(Event::Text(t)) => {
                    let chunk = t.unescape().map_err(|err| {
                        PeakIoError::invalid(self.cursor.source_name(), err.to_string())
                    })?;
                    text.push_str(&chunk);
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == name => return Ok(text),
                Ok(Event::Eof) => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        format!("end of file inside <{}>", String::from_utf8_lossy(name)),
                    ))
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        err.to_string(),
                    ))
                }
            }
        }
    }

    fn parse_precursor(&mut self, element: &BytesStart) -> Result<Peak, PeakIoError> {
        let charge = self
            .attribute(element, b"precursorCharge")?
            .map(|v| {
                v.parse::<i32>()
                    .map_err(|_| self.invalid(format!("unparseable precursorCharge '{v}'")))
            })
            .transpose()?;
        let intensity = self
            .attribute(element, b"precursorIntensity")?
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| self.invalid(format!("unparseable precursorIntensity '{v}'")))
            })
            .transpose()?;
        let text = self.element_text(b"precursorMz")?;
        let mz: f64 = text
            .trim()
            .parse()
            .map_err(|_| self.invalid(format!("unparseable precursorMz '{}'", text.trim())))?;
        let mut precursor = Peak::new(mz)?;
        precursor.set_intensity(intensity);
        precursor.set_charge(charge);
        Ok(precursor)
    }

    fn peaks_layout(&self, element: &BytesStart) -> Result<PeaksLayout, PeakIoError> {
        let mut layout = PeaksLayout::default();
        if let Some(precision) = self.attribute(element, b"precision")? {
            layout.precision = precision
                .parse()
                .map_err(|_| self.invalid(format!("unparseable precision '{precision}'")))?;
        }
        if let Some(byte_order) = self.attribute(element, b"byteOrder")? {
            layout.big_endian = byte_order.eq_ignore_ascii_case("network");
        }
        if let Some(compression) = self.attribute(element, b"compressionType")? {
            match compression.as_str() {
                "none" => {}
                "zlib" => layout.zlib = true,
                other => {
                    return Err(self.invalid(format!("unsupported peaks compression '{other}'")))
                }
            }
        }
        for order_attr in [&b"contentType"[..], &b"pairOrder"[..]] {
            if let Some(order) = self.attribute(element, order_attr)? {
                layout.intensity_first = order.eq_ignore_ascii_case("int-m/z");
            }
        }
        Ok(layout)
    }

    fn decode_peaks(&mut self, layout: &PeaksLayout, text: &str) -> Result<(), PeakIoError> {
        let source_name = self.cursor.source_name().to_string();
        let mut bytes = decode_base64(text, &source_name)?;
        if layout.zlib {
            bytes = decompress_zlib(&bytes, &source_name)?;
        }
        let values = decode_floats(&bytes, layout.precision, layout.big_endian, &source_name)?;
        if values.len() % 2 != 0 {
            return Err(self.invalid("peak data holds an odd number of values"));
        }
        self.buffered.clear();
        for pair in values.chunks_exact(2) {
            let (mz, intensity) = if layout.intensity_first {
                (pair[1], pair[0])
            } else {
                (pair[0], pair[1])
            };
            self.buffered.push_back(Peak::with_intensity(mz, intensity)?);
        }
        Ok(())
    }

    /// Forward to the next `<scan>` opening tag, at any nesting depth.
    /// `Ok(None)` at end of document.
    fn next_scan_element(&mut self) -> Result<Option<(BytesStart<'static>, bool)>, PeakIoError> {
        loop {
            self.buf.clear();
            let found = match self.xml.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"scan" => {
                    Some((e.into_owned(), false))
                }
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"scan" => {
                    Some((e.into_owned(), true))
                }
                Ok(Event::Eof) => return Ok(None),
                Ok(_) => None,
                Err(err) => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        err.to_string(),
                    ))
                }
            };
            if let Some(found) = found {
                return Ok(Some(found));
            }
        }
    }

    fn next_scan_step(&mut self) -> ScanStep {
        self.buf.clear();
        match self.xml.read_event_into(&mut self.buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"precursorMz" => {
                ScanStep::Precursor(e.into_owned())
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"peaks" => {
                ScanStep::Peaks(e.into_owned())
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"peaks" => ScanStep::EmptyPeaks,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"scan" => ScanStep::EndScan,
            Ok(Event::Eof) => ScanStep::Eof,
            Ok(_) => ScanStep::Skip,
            Err(err) => ScanStep::Fail(err.to_string()),
        }
    }
}

impl<R: io::Read> PeakListReader for MzXMLReader<R> {
    fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        &mut self.cursor
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        self.buffered.clear();

        let (scan, self_closing) = match self.next_scan_element()? {
            Some(found) => found,
            None => return Ok(None),
        };

        let tandem_level = self
            .attribute(&scan, b"msLevel")?
            .map(|v| {
                v.parse::<u8>()
                    .map_err(|_| self.invalid(format!("unparseable msLevel '{v}'")))
            })
            .transpose()?;
        let mut header = ListHeader {
            tandem_level,
            ..Default::default()
        };
        if self_closing {
            return Ok(Some(header));
        }

        // Walk the scan body up to and including its <peaks> payload.
        // Anything after it (nested scans, the closing tag) is left for
        // the next call.
        loop {
            match self.next_scan_step() {
                ScanStep::Precursor(element) => {
                    header.precursor = Some(self.parse_precursor(&element)?);
                }
                ScanStep::Peaks(element) => {
                    let layout = self.peaks_layout(&element)?;
                    let text = self.element_text(b"peaks")?;
                    self.decode_peaks(&layout, &text)?;
                    return Ok(Some(header));
                }
                ScanStep::EmptyPeaks => return Ok(Some(header)),
                // A scan carrying no peaks element at all.
                ScanStep::EndScan => return Ok(Some(header)),
                ScanStep::Skip => {}
                ScanStep::Eof => return Err(self.invalid("end of file inside <scan>")),
                ScanStep::Fail(message) => return Err(self.invalid(message)),
            }
        }
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        Ok(self.buffered.pop_front())
    }
}

/// Registry factory for the mzXML codec. The content probe checks the
/// document's root element, so `.xml` names reach this codec only when
/// they actually hold mzXML.
pub struct MzXMLFormat;

impl ReaderFactory for MzXMLFormat {
    fn format_name(&self) -> &'static str {
        "mzXML"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MzXMLReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MzXMLReader::with_source_name(stream, source_name)))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(MzXMLFormat)
}

pub(crate) fn probe() -> ContentProbe {
    Arc::new(|path: &Path| match read_declaration_from_path(path) {
        Ok(Some(declaration)) => Ok(declaration.is_mzxml()),
        Ok(None) => Ok(false),
        Err(PeakIoError::Io(err)) => Err(err),
        Err(_) => Ok(false),
    })
}

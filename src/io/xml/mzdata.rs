//! Read mzData (PSI 1.05) documents.
//!
//! Decoding is read-only, like the mzXML codec. One `<spectrum>` element
//! becomes one peak list. m/z and intensity values live in two separate
//! base64 `<data>` arrays with per-array precision and endianness;
//! precursor metadata arrives as `<cvParam>` entries under
//! `<ionSelection>`.
//!
//! Malformed-record policy: **strict**; structural problems abort with
//! [`PeakIoError::InvalidFileFormat`](crate::io::PeakIoError::InvalidFileFormat).
//!
//! **Requires the `mzdata-xml` feature, enabled by default.**

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
use super::{decode_base64, decode_floats, read_declaration_from_path};
use crate::peaks::Peak;

/// One step of walking a `<spectrum>` body, lifted out of the event loop
/// so the borrow of the parse buffer ends before the step is acted on.
enum SpectrumStep {
    Instrument(BytesStart<'static>),
    CvParam(BytesStart<'static>),
    MzArray,
    IntensityArray,
    EndSpectrum,
    Skip,
    Eof,
    Fail(String),
}

/// One step of walking a binary-array block.
enum ArrayStep {
    Data(BytesStart<'static>),
    EmptyData,
    Done,
    Skip,
    Eof,
    Fail(String),
}

/// An mzData document parser.
pub struct MzDataReader<R: io::Read> {
    xml: Reader<BufReader<R>>,
    buf: Vec<u8>,
    cursor: ListCursor,
    buffered: VecDeque<Peak>,
}

impl MzDataReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<MzDataReader<fs::File>, PeakIoError> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(MzDataReader::with_source_name(
            handle,
            path.display().to_string(),
        ))
    }
}

impl<R: io::Read> MzDataReader<R> {
    pub fn new(handle: R) -> MzDataReader<R> {
        MzDataReader::with_source_name(handle, "<mzdata stream>")
    }

    pub fn with_source_name<S: Into<String>>(handle: R, source_name: S) -> MzDataReader<R> {
        let mut xml = Reader::from_reader(BufReader::new(handle));
        xml.trim_text(true);
        MzDataReader {
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

    /// Apply one `<cvParam>` of an `<ionSelection>` block to the
    /// precursor being assembled. Entries are matched by PSI accession
    /// first, falling back to the human-readable name.
    fn apply_ion_param(
        &self,
        element: &BytesStart,
        precursor: &mut PrecursorBuilder,
    ) -> Result<(), PeakIoError> {
        let accession = self.attribute(element, b"accession")?.unwrap_or_default();
        let name = self.attribute(element, b"name")?.unwrap_or_default();
        let value = match self.attribute(element, b"value")? {
            Some(value) => value,
            None => return Ok(()),
        };
        if accession == "PSI:1000040" || name.eq_ignore_ascii_case("MassToChargeRatio") {
            precursor.mz = Some(
                value
                    .parse()
                    .map_err(|_| self.invalid(format!("unparseable precursor m/z '{value}'")))?,
            );
        } else if accession == "PSI:1000041" || name.eq_ignore_ascii_case("ChargeState") {
            precursor.charge = Some(
                value
                    .parse()
                    .map_err(|_| self.invalid(format!("unparseable precursor charge '{value}'")))?,
            );
        } else if accession == "PSI:1000042" || name.eq_ignore_ascii_case("Intensity") {
            precursor.intensity = Some(value.parse().map_err(|_| {
                self.invalid(format!("unparseable precursor intensity '{value}'"))
            })?);
        }
        Ok(())
    }

    fn next_array_step(&mut self, enclosing: &[u8]) -> ArrayStep {
        self.buf.clear();
        match self.xml.read_event_into(&mut self.buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"data" => {
                ArrayStep::Data(e.into_owned())
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"data" => ArrayStep::EmptyData,
            Ok(Event::End(e)) if e.local_name().as_ref() == enclosing => ArrayStep::Done,
            Ok(Event::Eof) => ArrayStep::Eof,
            Ok(_) => ArrayStep::Skip,
            Err(err) => ArrayStep::Fail(err.to_string()),
        }
    }

    /// Decode the `<data>` element of an `<mzArrayBinary>` or
    /// `<intenArrayBinary>` block, whose `Start` event was just consumed.
    fn parse_data_array(&mut self, enclosing: &[u8]) -> Result<Vec<f64>, PeakIoError> {
        let mut values = Vec::new();
        loop {
            match self.next_array_step(enclosing) {
                ArrayStep::Data(element) => {
                    let precision: u8 = match self.attribute(&element, b"precision")? {
                        Some(v) => v
                            .parse()
                            .map_err(|_| self.invalid(format!("unparseable precision '{v}'")))?,
                        None => 32,
                    };
                    let big_endian = match self.attribute(&element, b"endian")? {
                        Some(v) => v.eq_ignore_ascii_case("big"),
                        None => false,
                    };
                    let text = self.element_text(b"data")?;
                    let source_name = self.cursor.source_name().to_string();
                    let bytes = decode_base64(&text, &source_name)?;
                    values = decode_floats(&bytes, precision, big_endian, &source_name)?;
                }
                ArrayStep::EmptyData => {}
                ArrayStep::Done => return Ok(values),
                ArrayStep::Skip => {}
                ArrayStep::Eof => {
                    return Err(self.invalid(format!(
                        "end of file inside <{}>",
                        String::from_utf8_lossy(enclosing)
                    )))
                }
                ArrayStep::Fail(message) => return Err(self.invalid(message)),
            }
        }
    }

    fn next_spectrum_step(&mut self) -> SpectrumStep {
        self.buf.clear();
        match self.xml.read_event_into(&mut self.buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"spectrumInstrument" =>
            {
                SpectrumStep::Instrument(e.into_owned())
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"cvParam" =>
            {
                SpectrumStep::CvParam(e.into_owned())
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"mzArrayBinary" => {
                SpectrumStep::MzArray
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"intenArrayBinary" => {
                SpectrumStep::IntensityArray
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"spectrum" => {
                SpectrumStep::EndSpectrum
            }
            Ok(Event::Eof) => SpectrumStep::Eof,
            Ok(_) => SpectrumStep::Skip,
            Err(err) => SpectrumStep::Fail(err.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct PrecursorBuilder {
    mz: Option<f64>,
    intensity: Option<f64>,
    charge: Option<i32>,
}

impl PrecursorBuilder {
    fn build(self) -> Result<Option<Peak>, PeakIoError> {
        match self.mz {
            Some(mz) => {
                let mut precursor = Peak::new(mz)?;
                precursor.set_intensity(self.intensity);
                precursor.set_charge(self.charge);
                Ok(Some(precursor))
            }
            None => Ok(None),
        }
    }
}

impl<R: io::Read> PeakListReader for MzDataReader<R> {
    fn cursor(&self) -> &ListCursor {
        &self.cursor
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        &mut self.cursor
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        self.buffered.clear();

        // Forward to the next <spectrum>.
        loop {
            self.buf.clear();
            let found = match self.xml.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"spectrum" => true,
                Ok(Event::Eof) => return Ok(None),
                Ok(_) => false,
                Err(err) => {
                    return Err(PeakIoError::invalid(
                        self.cursor.source_name(),
                        err.to_string(),
                    ))
                }
            };
            if found {
                break;
            }
        }

        let mut header = ListHeader::default();
        let mut precursor = PrecursorBuilder::default();
        let mut mz_array: Option<Vec<f64>> = None;
        let mut intensity_array: Option<Vec<f64>> = None;

        loop {
            match self.next_spectrum_step() {
                SpectrumStep::Instrument(element) => {
                    header.tandem_level = self
                        .attribute(&element, b"msLevel")?
                        .map(|v| {
                            v.parse::<u8>()
                                .map_err(|_| self.invalid(format!("unparseable msLevel '{v}'")))
                        })
                        .transpose()?;
                }
                SpectrumStep::CvParam(element) => {
                    self.apply_ion_param(&element, &mut precursor)?;
                }
                SpectrumStep::MzArray => {
                    mz_array = Some(self.parse_data_array(b"mzArrayBinary")?);
                }
                SpectrumStep::IntensityArray => {
                    intensity_array = Some(self.parse_data_array(b"intenArrayBinary")?);
                }
                SpectrumStep::EndSpectrum => break,
                SpectrumStep::Skip => {}
                SpectrumStep::Eof => return Err(self.invalid("end of file inside <spectrum>")),
                SpectrumStep::Fail(message) => return Err(self.invalid(message)),
            }
        }

        let mzs = mz_array.unwrap_or_default();
        let intensities = intensity_array.unwrap_or_default();
        if mzs.len() != intensities.len() {
            return Err(self.invalid(format!(
                "m/z and intensity arrays disagree in length ({} vs {})",
                mzs.len(),
                intensities.len()
            )));
        }
        for (mz, intensity) in mzs.into_iter().zip(intensities) {
            self.buffered.push_back(Peak::with_intensity(mz, intensity)?);
        }
        header.precursor = precursor.build()?;
        Ok(Some(header))
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        Ok(self.buffered.pop_front())
    }
}

/// Registry factory for the mzData codec.
pub struct MzDataFormat;

impl ReaderFactory for MzDataFormat {
    fn format_name(&self) -> &'static str {
        "mzData"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MzDataReader::open_path(path)?))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        Ok(Box::new(MzDataReader::with_source_name(stream, source_name)))
    }
}

pub(crate) fn reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(MzDataFormat)
}

pub(crate) fn probe() -> ContentProbe {
    Arc::new(|path: &Path| match read_declaration_from_path(path) {
        Ok(Some(declaration)) => Ok(declaration.is_mzdata()),
        Ok(None) => Ok(false),
        Err(PeakIoError::Io(err)) => Err(err),
        Err(_) => Ok(false),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_f64_little(values: &[f64]) -> String {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        base64_simd::STANDARD.encode_type::<String>(&bytes)
    }

    fn encode_f32_little(values: &[f32]) -> String {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        base64_simd::STANDARD.encode_type::<String>(&bytes)
    }

    fn sample_document() -> String {
        let mzs = encode_f64_little(&[110.5, 220.25]);
        let intensities = encode_f32_little(&[1.5, 2.5]);
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<mzData version="1.05" accessionNumber="none">
  <spectrumList count="1">
    <spectrum id="1">
      <spectrumDesc>
        <spectrumSettings>
          <spectrumInstrument msLevel="2" mzRangeStart="100" mzRangeStop="300"/>
        </spectrumSettings>
        <precursorList count="1">
          <precursor msLevel="1" spectrumRef="0">
            <ionSelection>
              <cvParam cvLabel="psi" accession="PSI:1000040" name="MassToChargeRatio" value="445.34"/>
              <cvParam cvLabel="psi" accession="PSI:1000041" name="ChargeState" value="2"/>
              <cvParam cvLabel="psi" accession="PSI:1000042" name="Intensity" value="5000"/>
            </ionSelection>
          </precursor>
        </precursorList>
      </spectrumDesc>
      <mzArrayBinary>
        <data precision="64" endian="little" length="2">{mzs}</data>
      </mzArrayBinary>
      <intenArrayBinary>
        <data precision="32" endian="little" length="2">{intensities}</data>
      </intenArrayBinary>
    </spectrum>
  </spectrumList>
</mzData>"#
        )
    }

    #[test]
    fn test_read_spectrum() {
        let doc = sample_document();
        let mut reader = MzDataReader::new(doc.as_bytes());
        let list = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(list.tandem_level, Some(2));
        let precursor = list.precursor.as_ref().unwrap();
        assert!((precursor.mz() - 445.34).abs() < 1e-9);
        assert_eq!(precursor.charge(), Some(2));
        assert_eq!(precursor.intensity(), Some(5000.0));
        assert_eq!(list.len(), 2);
        assert!((list.peaks[0].mz() - 110.5).abs() < 1e-9);
        assert!((list.peaks[1].intensity().unwrap() - 2.5).abs() < 1e-6);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_length_mismatch_is_invalid() {
        let mzs = encode_f64_little(&[110.5, 220.25]);
        let intensities = encode_f32_little(&[1.5]);
        let doc = format!(
            r#"<mzData version="1.05"><spectrumList count="1"><spectrum id="1">
<mzArrayBinary><data precision="64" endian="little" length="2">{mzs}</data></mzArrayBinary>
<intenArrayBinary><data precision="32" endian="little" length="1">{intensities}</data></intenArrayBinary>
</spectrum></spectrumList></mzData>"#
        );
        let mut reader = MzDataReader::new(doc.as_bytes());
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::InvalidFileFormat { .. })
        ));
    }
}

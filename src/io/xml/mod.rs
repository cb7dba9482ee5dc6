//! Shared machinery for the XML peak list formats: root-element probing
//! used to tell the sub-formats apart when all that is known is a generic
//! `.xml` name, and decoding of the base64-packed binary peak arrays.
//!
//! **Requires the `xml-core` feature, pulled in by `mzxml` and
//! `mzdata-xml` (enabled by default).**

#[cfg(feature = "mzdata-xml")]
pub mod mzdata;
#[cfg(feature = "mzxml")]
pub mod mzxml;

use std::fs;
use std::io::{self, prelude::*, BufReader};
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::registry::{ContentProbe, ReaderFactory};
use super::traits::PeakListReader;
use super::PeakIoError;

/// What the opening of an XML document declares about itself: the root
/// element's local name, its default namespace, and a `version`
/// attribute when present. This is all the registry needs to pick a
/// sub-format codec, and reading stops as soon as the root element has
/// been seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct XmlDeclaration {
    pub root: String,
    pub namespace: Option<String>,
    pub version: Option<String>,
}

impl XmlDeclaration {
    pub fn is_mzxml(&self) -> bool {
        self.root.eq_ignore_ascii_case("mzXML")
            || self
                .namespace
                .as_deref()
                .is_some_and(|ns| ns.contains("mzXML"))
    }

    pub fn is_mzdata(&self) -> bool {
        self.root.eq_ignore_ascii_case("mzData")
    }
}

/// Parse forward to the document's root element and report what it
/// declares. `Ok(None)` when the input ends before any element opens.
pub fn read_declaration<R: BufRead>(
    handle: R,
    source_name: &str,
) -> Result<Option<XmlDeclaration>, PeakIoError> {
    let mut reader = Reader::from_reader(handle);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let mut declaration = XmlDeclaration {
                    root: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| {
                        PeakIoError::invalid(source_name, err.to_string())
                    })?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| PeakIoError::invalid(source_name, err.to_string()))?;
                    match attr.key.as_ref() {
                        b"xmlns" => declaration.namespace = Some(value.into_owned()),
                        b"version" => declaration.version = Some(value.into_owned()),
                        _ => {}
                    }
                }
                return Ok(Some(declaration));
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(err) => return Err(PeakIoError::invalid(source_name, err.to_string())),
        }
        buf.clear();
    }
}

pub fn read_declaration_from_path(path: &Path) -> Result<Option<XmlDeclaration>, PeakIoError> {
    let handle = fs::File::open(path)?;
    read_declaration(BufReader::new(handle), &path.display().to_string())
}

/// Content probe for the generic `*.xml` registry binding: accepts when
/// the document's root element names a peak list format this crate
/// decodes.
pub fn recognized_peak_xml(path: &Path) -> io::Result<bool> {
    match read_declaration_from_path(path) {
        Ok(Some(declaration)) => {
            let recognized = (cfg!(feature = "mzxml") && declaration.is_mzxml())
                || (cfg!(feature = "mzdata-xml") && declaration.is_mzdata());
            Ok(recognized)
        }
        // Not parseable as XML: decline so later bindings get a chance.
        Ok(None) | Err(PeakIoError::InvalidFileFormat { .. }) => Ok(false),
        Err(PeakIoError::Io(err)) => Err(err),
        Err(_) => Ok(false),
    }
}

/// Registry factory for generic `.xml` names: probes the root element
/// and hands off to the sub-format codec it identifies.
pub struct XmlAutoFormat;

impl ReaderFactory for XmlAutoFormat {
    fn format_name(&self) -> &'static str {
        "XML"
    }

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        let declaration = read_declaration_from_path(path)?.ok_or_else(|| {
            PeakIoError::invalid(path.display().to_string(), "no XML root element found")
        })?;
        #[cfg(feature = "mzxml")]
        if declaration.is_mzxml() {
            return Ok(Box::new(mzxml::MzXMLReader::open_path(path)?));
        }
        #[cfg(feature = "mzdata-xml")]
        if declaration.is_mzdata() {
            return Ok(Box::new(mzdata::MzDataReader::open_path(path)?));
        }
        Err(PeakIoError::UnknownFormat(format!(
            "{} (XML root element '{}')",
            path.display(),
            declaration.root
        )))
    }

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        // The stream cannot be rewound after probing, so probe a buffered
        // prefix and stitch it back in front of the remainder.
        let mut prefix = vec![0u8; 8192];
        let mut stream = stream;
        let mut filled = 0;
        while filled < prefix.len() {
            let n = stream.read(&mut prefix[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        prefix.truncate(filled);
        let declaration = read_declaration(io::Cursor::new(&prefix), source_name)?
            .ok_or_else(|| PeakIoError::invalid(source_name, "no XML root element found"))?;
        let rejoined: Box<dyn io::Read + Send> = Box::new(io::Cursor::new(prefix).chain(stream));
        #[cfg(feature = "mzxml")]
        if declaration.is_mzxml() {
            return Ok(Box::new(mzxml::MzXMLReader::with_source_name(
                rejoined,
                source_name,
            )));
        }
        #[cfg(feature = "mzdata-xml")]
        if declaration.is_mzdata() {
            return Ok(Box::new(mzdata::MzDataReader::with_source_name(
                rejoined,
                source_name,
            )));
        }
        let _ = rejoined;
        Err(PeakIoError::UnknownFormat(format!(
            "{} (XML root element '{}')",
            source_name, declaration.root
        )))
    }
}

pub(crate) fn auto_reader_factory() -> Arc<dyn ReaderFactory> {
    Arc::new(XmlAutoFormat)
}

pub(crate) fn auto_probe() -> ContentProbe {
    Arc::new(recognized_peak_xml)
}

/// True when the buffer opens like an mzXML document.
#[cfg(feature = "mzxml")]
pub fn is_mzxml(buf: &[u8]) -> bool {
    let needle = b"<mzXML";
    buf.windows(needle.len()).any(|window| window == needle)
}

/// True when the buffer opens like an mzData document.
#[cfg(feature = "mzdata-xml")]
pub fn is_mzdata(buf: &[u8]) -> bool {
    let needle = b"<mzData";
    buf.windows(needle.len()).any(|window| window == needle)
}

/// Decode a base64 payload after stripping the whitespace XML pretty
/// printers scatter through long runs.
pub(crate) fn decode_base64(text: &str, source_name: &str) -> Result<Vec<u8>, PeakIoError> {
    let compact: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    base64_simd::STANDARD
        .decode_type::<Vec<u8>>(&compact)
        .map_err(|err| {
            PeakIoError::invalid(source_name, format!("bad base64 peak data: {err}"))
        })
}

/// Reassemble IEEE floats from a decoded byte buffer. `precision` is 32
/// or 64 bits per value; `big_endian` selects network byte order.
pub(crate) fn decode_floats(
    bytes: &[u8],
    precision: u8,
    big_endian: bool,
    source_name: &str,
) -> Result<Vec<f64>, PeakIoError> {
    let width = match precision {
        32 => 4,
        64 => 8,
        _ => {
            return Err(PeakIoError::invalid(
                source_name,
                format!("unsupported peak precision {precision}"),
            ))
        }
    };
    if bytes.len() % width != 0 {
        return Err(PeakIoError::invalid(
            source_name,
            format!(
                "peak data length {} is not a multiple of the value width {width}",
                bytes.len()
            ),
        ));
    }
    let mut values = Vec::with_capacity(bytes.len() / width);
    if width == 4 {
        for chunk in bytes.chunks_exact(4) {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let value = if big_endian {
                f32::from_be_bytes(raw)
            } else {
                f32::from_le_bytes(raw)
            };
            values.push(value as f64);
        }
    } else {
        for chunk in bytes.chunks_exact(8) {
            let raw = [
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ];
            let value = if big_endian {
                f64::from_be_bytes(raw)
            } else {
                f64::from_le_bytes(raw)
            };
            values.push(value);
        }
    }
    Ok(values)
}

/// Inflate a zlib-compressed peak array.
pub(crate) fn decompress_zlib(bytes: &[u8], source_name: &str) -> Result<Vec<u8>, PeakIoError> {
    let mut decoder = flate2::read::ZlibDecoder::new(bytes);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).map_err(|err| {
        PeakIoError::invalid(source_name, format!("bad zlib peak data: {err}"))
    })?;
    Ok(inflated)
}

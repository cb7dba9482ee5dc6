//! Infer a peak list file's format from its name or its leading bytes,
//! used when the registry's filename patterns come up empty.

use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*, BufReader};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;

use super::compression::{is_gzipped, is_gzipped_extension};
use super::traits::PeakListReader;
use super::PeakIoError;

#[cfg(feature = "mgf")]
use super::mgf::{is_mgf, MGFReader};

#[cfg(feature = "mzxml")]
use super::xml::{is_mzxml, mzxml::MzXMLReader};

#[cfg(feature = "mzdata-xml")]
use super::xml::{is_mzdata, mzdata::MzDataReader};

use super::dta::DTAReader;
use super::pkl::PKLReader;
use super::xy::XYReader;

/// Peak list file formats this crate recognizes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeakFileFormat {
    #[cfg(feature = "mgf")]
    MGF,
    DTA,
    PKL,
    XY,
    #[cfg(feature = "mzxml")]
    MzXML,
    #[cfg(feature = "mzdata-xml")]
    MzData,
    Unknown,
}

impl Display for PeakFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Given a path, infer the file format and whether the file is GZIP
/// compressed, from the name alone.
pub fn infer_from_path<P: Into<PathBuf>>(path: P) -> (PeakFileFormat, bool) {
    let path: PathBuf = path.into();
    let (is_gzipped, path) = is_gzipped_extension(&path);
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_ascii_lowercase(),
        None => return (PeakFileFormat::Unknown, is_gzipped),
    };
    // The double extensions go first; their final `.xml` is generic.
    #[cfg(feature = "mzxml")]
    if name.ends_with(".mzxml.xml") || name.ends_with(".mzxml") {
        return (PeakFileFormat::MzXML, is_gzipped);
    }
    #[cfg(feature = "mzdata-xml")]
    if name.ends_with(".mzdata.xml") || name.ends_with(".mzdata") {
        return (PeakFileFormat::MzData, is_gzipped);
    }
    let format = match name.rsplit_once('.').map(|(_, ext)| ext) {
        #[cfg(feature = "mgf")]
        Some("mgf") => PeakFileFormat::MGF,
        Some("dta") => PeakFileFormat::DTA,
        Some("pkl") => PeakFileFormat::PKL,
        Some("txt") | Some("xy") => PeakFileFormat::XY,
        _ => PeakFileFormat::Unknown,
    };
    (format, is_gzipped)
}

/// Given a stream of bytes, infer the file format and whether the stream
/// is GZIP compressed, by sniffing its head. Assumes the stream is
/// seekable; the position is restored before returning.
///
/// Only formats with a recognizable signature are sniffed. The bare
/// numeric table formats (DTA, PKL, XY) are indistinguishable from one
/// another by content and come back [`PeakFileFormat::Unknown`].
pub fn infer_from_stream<R: Read + Seek>(
    stream: &mut R,
) -> io::Result<(PeakFileFormat, bool)> {
    let mut buf = vec![0u8; 500];
    let current_pos = stream.stream_position()?;
    let bytes_read = stream.read(&mut buf)?;
    buf.truncate(bytes_read);
    let is_stream_gzipped = is_gzipped(&buf);
    if is_stream_gzipped {
        // Decompress only as many bytes as were read in; the ratio means
        // that much plain text is certainly available, and asking for
        // more would error out on the truncated trailing segment.
        let mut decompressed = vec![0u8; bytes_read];
        let mut decoder = GzDecoder::new(io::Cursor::new(buf));
        let mut filled = 0;
        while filled < decompressed.len() {
            match decoder.read(&mut decompressed[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                // The tail of the window is a truncated deflate segment.
                Err(_) => break,
            }
        }
        decompressed.truncate(filled);
        buf = decompressed;
    }
    stream.seek(io::SeekFrom::Start(current_pos))?;

    let format = match &buf {
        #[cfg(feature = "mzxml")]
        _ if is_mzxml(&buf) => PeakFileFormat::MzXML,
        #[cfg(feature = "mzdata-xml")]
        _ if is_mzdata(&buf) => PeakFileFormat::MzData,
        #[cfg(feature = "mgf")]
        _ if is_mgf(&buf) => PeakFileFormat::MGF,
        _ => PeakFileFormat::Unknown,
    };
    Ok((format, is_stream_gzipped))
}

/// Open a reader for `path`, falling back to content sniffing when the
/// registry has no binding for the name. This is the entry point for
/// files with unhelpful names, e.g. exports called `spectrum.out`.
pub fn open_detected<P: AsRef<Path>>(path: P) -> Result<Box<dyn PeakListReader>, PeakIoError> {
    let path = path.as_ref();
    match super::registry::open_path(path) {
        Ok(reader) => Ok(reader),
        Err(PeakIoError::UnknownFormat(_)) => {
            let mut stream = BufReader::new(fs::File::open(path)?);
            let (format, gzipped) = infer_from_stream(&mut stream)?;
            open_as(path, format, gzipped)
        }
        Err(err) => Err(err),
    }
}

fn open_as(
    path: &Path,
    format: PeakFileFormat,
    gzipped: bool,
) -> Result<Box<dyn PeakListReader>, PeakIoError> {
    let source_name = path.display().to_string();
    macro_rules! construct {
        ($reader:ident) => {
            if gzipped {
                let handle = fs::File::open(path)?;
                let stream = GzDecoder::new(BufReader::new(handle));
                Box::new($reader::with_source_name(stream, source_name))
                    as Box<dyn PeakListReader>
            } else {
                Box::new($reader::open_path(path)?) as Box<dyn PeakListReader>
            }
        };
    }
    let reader = match format {
        #[cfg(feature = "mgf")]
        PeakFileFormat::MGF => construct!(MGFReader),
        PeakFileFormat::DTA => construct!(DTAReader),
        PeakFileFormat::PKL => construct!(PKLReader),
        PeakFileFormat::XY => construct!(XYReader),
        #[cfg(feature = "mzxml")]
        PeakFileFormat::MzXML => construct!(MzXMLReader),
        #[cfg(feature = "mzdata-xml")]
        PeakFileFormat::MzData => construct!(MzDataReader),
        _ => return Err(PeakIoError::UnknownFormat(source_name)),
    };
    Ok(reader)
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(all(feature = "mgf", feature = "mzxml", feature = "mzdata-xml"))]
    #[test]
    fn test_infer_from_path() {
        let (format, zipped) = infer_from_path("./data/run.mgf");
        assert_eq!(format, PeakFileFormat::MGF);
        assert!(!zipped);

        let (format, zipped) = infer_from_path("./data/run.MGF.gz");
        assert_eq!(format, PeakFileFormat::MGF);
        assert!(zipped);

        let (format, _) = infer_from_path("sample.mzxml.xml");
        assert_eq!(format, PeakFileFormat::MzXML);
        let (format, _) = infer_from_path("sample.mzdata.xml");
        assert_eq!(format, PeakFileFormat::MzData);

        let (format, _) = infer_from_path("spectrum.out");
        assert_eq!(format, PeakFileFormat::Unknown);
    }

    #[cfg(all(feature = "mgf", feature = "mzxml"))]
    #[test]
    fn test_infer_from_stream() {
        let mut stream =
            io::Cursor::new(b"BEGIN IONS\nPEPMASS=500.5\n100.0\t10\nEND IONS\n".to_vec());
        let (format, gzipped) = infer_from_stream(&mut stream).unwrap();
        assert_eq!(format, PeakFileFormat::MGF);
        assert!(!gzipped);
        // The position is restored for the reader that follows.
        assert_eq!(stream.stream_position().unwrap(), 0);

        let mut stream = io::Cursor::new(b"<mzXML xmlns=\"x\"></mzXML>".to_vec());
        let (format, _) = infer_from_stream(&mut stream).unwrap();
        assert_eq!(format, PeakFileFormat::MzXML);
    }

    #[cfg(feature = "mgf")]
    #[test]
    fn test_infer_gzipped_stream() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"BEGIN IONS\nPEPMASS=500.5\n100.0\t10\nEND IONS\n")
            .unwrap();
        let compressed = encoder.finish().unwrap();
        let mut stream = io::Cursor::new(compressed);
        let (format, gzipped) = infer_from_stream(&mut stream).unwrap();
        assert_eq!(format, PeakFileFormat::MGF);
        assert!(gzipped);
    }

    #[cfg(feature = "mgf")]
    #[test]
    fn test_open_detected_sniffs_unregistered_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrum.out");
        fs::write(&path, "BEGIN IONS\nPEPMASS=500.5\n100.0\t10\nEND IONS\n").unwrap();
        let mut reader = open_detected(&path).unwrap();
        let list = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(list.precursor.as_ref().unwrap().mz(), 500.5);
        assert!(reader.next_peak_list().unwrap().is_none());
    }

    #[test]
    fn test_open_detected_unsniffable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        fs::write(&path, [0u8, 1, 2, 3, 4, 5]).unwrap();
        assert!(matches!(
            open_detected(&path),
            Err(PeakIoError::UnknownFormat(_))
        ));
    }
}

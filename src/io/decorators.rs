//! Decorators that stack on top of a concrete reader or writer without
//! changing the protocol: gzip output staging, and best-effort cleanup of
//! temporary files left over from external conversions.
//!
//! Decorators forward the protocol's low-level primitives (and the shared
//! cursor) to the inner codec, so the provided protocol methods behave
//! exactly as they would on the codec itself, with the decorator's extra
//! work hooked into `release`/`finish`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;

use super::registry::WriterFactory;
use super::traits::{
    ListCursor, ListHeader, PeakListReader, PeakListWriter, WriterCursor,
};
use super::PeakIoError;
use crate::peaks::{Peak, PeakList};

/// A writer decorator producing a gzip-compressed target.
///
/// The inner encoder writes uncompressed output to a sibling temporary
/// file; `close` compresses the finished temporary into the real target
/// and removes it. The target path therefore never holds
/// partially-written compressed data.
pub struct GzipWriter {
    inner: Box<dyn PeakListWriter>,
    temp_path: PathBuf,
    target_path: PathBuf,
}

impl GzipWriter {
    /// Stage output for `target` (a `*.gz` path) through `factory`,
    /// which is resolved for the name with the `.gz` suffix stripped.
    pub fn create(factory: &dyn WriterFactory, target: &Path) -> Result<GzipWriter, PeakIoError> {
        let mut staged = target.as_os_str().to_owned();
        staged.push(".tmp");
        let temp_path = PathBuf::from(staged);
        let inner = factory.create_path(&temp_path)?;
        Ok(GzipWriter {
            inner,
            temp_path,
            target_path: target.to_path_buf(),
        })
    }

    fn compress_staged(&self) -> Result<(), PeakIoError> {
        let mut source = fs::File::open(&self.temp_path)?;
        let target = fs::File::create(&self.target_path)?;
        let mut encoder = GzEncoder::new(target, Compression::default());
        io::copy(&mut source, &mut encoder)?;
        encoder.finish()?;
        if let Err(err) = fs::remove_file(&self.temp_path) {
            warn!(
                "failed to remove staging file {}: {}",
                self.temp_path.display(),
                err
            );
        }
        Ok(())
    }
}

impl PeakListWriter for GzipWriter {
    fn writer_cursor(&self) -> &WriterCursor {
        self.inner.writer_cursor()
    }

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor {
        self.inner.writer_cursor_mut()
    }

    fn check_compatible(&self, list: &PeakList) -> Result<(), PeakIoError> {
        self.inner.check_compatible(list)
    }

    fn begin_list(&mut self, header: &ListHeader) -> Result<(), PeakIoError> {
        self.inner.begin_list(header)
    }

    fn put_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError> {
        self.inner.put_peak(peak)
    }

    fn finish(&mut self) -> Result<(), PeakIoError> {
        self.inner.finish()?;
        self.compress_staged()
    }
}

/// A reader decorator that deletes intermediate files once the inner
/// reader is closed. Deletion is best-effort: failures are logged and
/// swallowed.
pub struct CleanupReader {
    inner: Box<dyn PeakListReader>,
    temp_paths: Vec<PathBuf>,
}

impl CleanupReader {
    pub fn new(inner: Box<dyn PeakListReader>, temp_paths: Vec<PathBuf>) -> CleanupReader {
        CleanupReader { inner, temp_paths }
    }
}

fn remove_best_effort(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!("failed to remove temporary {}: {}", path.display(), err);
        }
    }
}

impl PeakListReader for CleanupReader {
    fn cursor(&self) -> &ListCursor {
        self.inner.cursor()
    }

    fn cursor_mut(&mut self) -> &mut ListCursor {
        self.inner.cursor_mut()
    }

    fn parse_next_header(&mut self) -> Result<Option<ListHeader>, PeakIoError> {
        self.inner.parse_next_header()
    }

    fn parse_next_peak(&mut self) -> Result<Option<Peak>, PeakIoError> {
        self.inner.parse_next_peak()
    }

    fn release(&mut self) {
        self.inner.release();
        remove_best_effort(&self.temp_paths);
    }
}

/// The writer-side counterpart of [`CleanupReader`].
pub struct CleanupWriter {
    inner: Box<dyn PeakListWriter>,
    temp_paths: Vec<PathBuf>,
}

impl CleanupWriter {
    pub fn new(inner: Box<dyn PeakListWriter>, temp_paths: Vec<PathBuf>) -> CleanupWriter {
        CleanupWriter { inner, temp_paths }
    }
}

impl PeakListWriter for CleanupWriter {
    fn writer_cursor(&self) -> &WriterCursor {
        self.inner.writer_cursor()
    }

    fn writer_cursor_mut(&mut self) -> &mut WriterCursor {
        self.inner.writer_cursor_mut()
    }

    fn check_compatible(&self, list: &PeakList) -> Result<(), PeakIoError> {
        self.inner.check_compatible(list)
    }

    fn begin_list(&mut self, header: &ListHeader) -> Result<(), PeakIoError> {
        self.inner.begin_list(header)
    }

    fn put_peak(&mut self, peak: &Peak) -> Result<(), PeakIoError> {
        self.inner.put_peak(peak)
    }

    fn finish(&mut self) -> Result<(), PeakIoError> {
        self.inner.finish()?;
        remove_best_effort(&self.temp_paths);
        Ok(())
    }
}

pub(crate) fn gzip_writer(
    factory: Arc<dyn WriterFactory>,
    target: &Path,
) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
    Ok(Box::new(GzipWriter::create(factory.as_ref(), target)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::dta::{DTAReader, DTAWriter};
    #[cfg(feature = "mgf")]
    use crate::io::mgf::MGFReader;
    use crate::peaks::PeakList;
    use flate2::read::GzDecoder;
    use std::io::prelude::*;

    struct TempDTAWriterFactory;

    impl WriterFactory for TempDTAWriterFactory {
        fn format_name(&self) -> &'static str {
            "DTA"
        }

        fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
            Ok(Box::new(DTAWriter::create_path(path)?))
        }
    }

    fn tandem_list() -> PeakList {
        let mut list = PeakList::tandem(Peak::with_charge(500.75364, 1.0, 2).unwrap(), 2);
        list.push(Peak::with_intensity(100.0, 10.0).unwrap());
        list.push(Peak::with_intensity(200.0, 20.0).unwrap());
        list
    }

    #[test]
    fn test_gzip_writer_stages_then_compresses() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.dta.gz");
        let mut writer = GzipWriter::create(&TempDTAWriterFactory, &target).unwrap();
        writer.write(&tandem_list()).unwrap();

        // Nothing at the target until close; the staging file exists.
        assert!(!target.exists());
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(target.exists());
        assert!(!dir.path().join("out.dta.gz.tmp").exists());

        let mut decoder = GzDecoder::new(fs::File::open(&target).unwrap());
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        let mut reread = DTAReader::new(text.as_bytes());
        let list = reread.next_peak_list().unwrap().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.precursor.as_ref().unwrap().charge(), Some(2));
    }

    #[cfg(feature = "mgf")]
    #[test]
    fn test_cleanup_reader_removes_temps_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("scratch.mgf");
        fs::write(
            &data_path,
            "BEGIN IONS\nPEPMASS=500.5\n100.0\t10\nEND IONS\n",
        )
        .unwrap();

        let inner = Box::new(MGFReader::open_path(&data_path).unwrap());
        let mut reader = CleanupReader::new(inner, vec![data_path.clone()]);
        let list = reader.next_peak_list().unwrap().unwrap();
        assert_eq!(list.len(), 1);
        assert!(data_path.exists());
        reader.close();
        reader.close();
        assert!(!data_path.exists());
        assert!(matches!(
            reader.next_peak_list(),
            Err(PeakIoError::UseAfterClose)
        ));
    }

    #[cfg(feature = "mgf")]
    #[test]
    fn test_cleanup_swallows_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("scratch.mgf");
        fs::write(
            &data_path,
            "BEGIN IONS\nPEPMASS=500.5\n100.0\t10\nEND IONS\n",
        )
        .unwrap();
        let inner = Box::new(MGFReader::open_path(&data_path).unwrap());
        let mut reader =
            CleanupReader::new(inner, vec![dir.path().join("never-existed.tmp")]);
        reader.close();
    }
}

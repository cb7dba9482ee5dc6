//! The format registry: an ordered table of filename patterns bound to
//! codec factories, resolving a path to the reader or writer responsible
//! for it.
//!
//! Resolution is two-phase. The filename pre-filters candidate bindings
//! in registration order; when a candidate carries a content probe — the
//! XML family, whose members all answer to a generic `.xml` suffix — the
//! probe inspects the document's declared root element before the
//! binding is accepted. If every probe declines, the first name match
//! wins by registration order.
//!
//! A process-wide default registry seeded with the built-in formats is
//! available through [`default_registry`]; it is shared mutable state
//! behind a mutex, so registration may race safely with resolution in a
//! threaded host. Tests and embedders wanting isolation construct their
//! own [`FormatRegistry`] instead.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;
use regex::Regex;

use super::compression::is_gzipped_extension;
use super::decorators;
use super::traits::{PeakListReader, PeakListWriter};
use super::PeakIoError;

/// A case-insensitive glob (`*`, `?`) matched against a path's final
/// component. The original pattern text is the registry key: registering
/// the same text again replaces the earlier binding in place.
#[derive(Debug, Clone)]
pub struct NamePattern {
    text: String,
    matcher: Regex,
}

impl NamePattern {
    pub fn glob(pattern: &str) -> NamePattern {
        let mut expr = String::from("(?i)^");
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                ch => {
                    let mut token = [0u8; 4];
                    expr.push_str(&regex::escape(ch.encode_utf8(&mut token)));
                }
            }
        }
        expr.push('$');
        // Everything but the translated wildcards is escaped, so the
        // expression is valid by construction.
        let matcher = Regex::new(&expr).unwrap();
        NamePattern {
            text: pattern.to_string(),
            matcher,
        }
    }

    /// Shorthand for `*<suffix>` patterns, e.g. `NamePattern::suffix(".mgf")`.
    pub fn suffix(suffix: &str) -> NamePattern {
        NamePattern::glob(&format!("*{suffix}"))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

/// An optional second-phase check run against the file when the filename
/// alone cannot identify the format. `Ok(false)` declines quietly so the
/// scan continues; an `Err` aborts resolution.
pub type ContentProbe = Arc<dyn Fn(&Path) -> io::Result<bool> + Send + Sync>;

/// Constructs readers for one format, bound to a path or to an
/// already-open stream (used when reading through a decompressor).
pub trait ReaderFactory: Send + Sync {
    fn format_name(&self) -> &'static str;

    fn open_path(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError>;

    fn open_stream(
        &self,
        source_name: &str,
        stream: Box<dyn io::Read + Send>,
    ) -> Result<Box<dyn PeakListReader>, PeakIoError>;
}

/// Constructs writers for one format.
pub trait WriterFactory: Send + Sync {
    fn format_name(&self) -> &'static str;

    fn create_path(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError>;
}

struct ReaderBinding {
    pattern: NamePattern,
    factory: Arc<dyn ReaderFactory>,
    probe: Option<ContentProbe>,
}

struct WriterBinding {
    pattern: NamePattern,
    factory: Arc<dyn WriterFactory>,
}

/// The ordered pattern tables for readers and writers.
pub struct FormatRegistry {
    readers: IndexMap<String, ReaderBinding>,
    writers: IndexMap<String, WriterBinding>,
}

impl Default for FormatRegistry {
    fn default() -> FormatRegistry {
        FormatRegistry::with_defaults()
    }
}

impl FormatRegistry {
    /// A registry with no bindings at all.
    pub fn empty() -> FormatRegistry {
        FormatRegistry {
            readers: IndexMap::new(),
            writers: IndexMap::new(),
        }
    }

    /// A registry seeded with every built-in codec. Caller-registered
    /// bindings land after these and can override them by re-registering
    /// the same pattern text.
    pub fn with_defaults() -> FormatRegistry {
        let mut registry = FormatRegistry::empty();

        #[cfg(feature = "mgf")]
        {
            registry.register_reader(NamePattern::suffix(".mgf"), super::mgf::reader_factory());
            registry.register_writer(NamePattern::suffix(".mgf"), super::mgf::writer_factory());
        }

        registry.register_reader(NamePattern::suffix(".dta"), super::dta::reader_factory());
        registry.register_writer(NamePattern::suffix(".dta"), super::dta::writer_factory());

        registry.register_reader(NamePattern::suffix(".pkl"), super::pkl::reader_factory());
        registry.register_writer(NamePattern::suffix(".pkl"), super::pkl::writer_factory());

        for suffix in [".txt", ".xy"] {
            registry.register_reader(NamePattern::suffix(suffix), super::xy::reader_factory());
            registry.register_writer(NamePattern::suffix(suffix), super::xy::writer_factory());
        }

        #[cfg(feature = "mzxml")]
        for suffix in [".mzxml", ".mzxml.xml"] {
            registry.register_reader_with_probe(
                NamePattern::suffix(suffix),
                super::xml::mzxml::reader_factory(),
                super::xml::mzxml::probe(),
            );
        }

        #[cfg(feature = "mzdata-xml")]
        for suffix in [".mzdata", ".mzdata.xml"] {
            registry.register_reader_with_probe(
                NamePattern::suffix(suffix),
                super::xml::mzdata::reader_factory(),
                super::xml::mzdata::probe(),
            );
        }

        // Generic XML names are disambiguated by reading the document's
        // declared root element.
        #[cfg(feature = "xml-core")]
        registry.register_reader_with_probe(
            NamePattern::suffix(".xml"),
            super::xml::auto_reader_factory(),
            super::xml::auto_probe(),
        );

        registry
    }

    /// Append a reader binding, or replace in place when `pattern`'s text
    /// is already registered.
    pub fn register_reader(&mut self, pattern: NamePattern, factory: Arc<dyn ReaderFactory>) {
        self.readers.insert(
            pattern.text().to_string(),
            ReaderBinding {
                pattern,
                factory,
                probe: None,
            },
        );
    }

    /// Like [`register_reader`](FormatRegistry::register_reader), with a
    /// content probe consulted when the pattern matches.
    pub fn register_reader_with_probe(
        &mut self,
        pattern: NamePattern,
        factory: Arc<dyn ReaderFactory>,
        probe: ContentProbe,
    ) {
        self.readers.insert(
            pattern.text().to_string(),
            ReaderBinding {
                pattern,
                factory,
                probe: Some(probe),
            },
        );
    }

    /// Append a writer binding, or replace in place when `pattern`'s text
    /// is already registered.
    pub fn register_writer(&mut self, pattern: NamePattern, factory: Arc<dyn WriterFactory>) {
        self.writers
            .insert(pattern.text().to_string(), WriterBinding { pattern, factory });
    }

    fn file_name(path: &Path) -> Result<String, PeakIoError> {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .ok_or_else(|| PeakIoError::UnknownFormat(path.display().to_string()))
    }

    fn match_reader(
        &self,
        name: &str,
        probe_target: Option<&Path>,
    ) -> Result<&ReaderBinding, PeakIoError> {
        let mut fallback = None;
        for binding in self.readers.values() {
            if !binding.pattern.matches(name) {
                continue;
            }
            match (&binding.probe, probe_target) {
                (Some(probe), Some(path)) => {
                    if probe.as_ref()(path)? {
                        return Ok(binding);
                    }
                    fallback.get_or_insert(binding);
                }
                // No probe, or nothing to probe against: the name match
                // is decisive.
                _ => return Ok(binding),
            }
        }
        fallback.ok_or_else(|| PeakIoError::UnknownFormat(name.to_string()))
    }

    fn match_writer(&self, name: &str) -> Result<&WriterBinding, PeakIoError> {
        self.writers
            .values()
            .find(|binding| binding.pattern.matches(name))
            .ok_or_else(|| PeakIoError::UnknownFormat(name.to_string()))
    }

    /// Resolve `path` to a bound reader. `*.gz` names resolve the inner
    /// name and read through a gzip decompressor.
    pub fn resolve_reader(&self, path: &Path) -> Result<Box<dyn PeakListReader>, PeakIoError> {
        let name = Self::file_name(path)?;
        let (zipped, inner) = is_gzipped_extension(Path::new(&name));
        if zipped {
            let inner_name = Self::file_name(&inner)?;
            // Content probes would read compressed bytes; factories that
            // need one sniff the decompressed stream themselves.
            let binding = self.match_reader(&inner_name, None)?;
            let handle = fs::File::open(path)?;
            let stream = flate2::bufread::GzDecoder::new(io::BufReader::new(handle));
            binding
                .factory
                .open_stream(&format!("{}", path.display()), Box::new(stream))
        } else {
            let binding = self.match_reader(&name, Some(path))?;
            binding.factory.open_path(path)
        }
    }

    /// Resolve `path` to a bound writer. `*.gz` names resolve the inner
    /// name and stack the gzip staging decorator.
    pub fn resolve_writer(&self, path: &Path) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
        let name = Self::file_name(path)?;
        let (zipped, inner) = is_gzipped_extension(Path::new(&name));
        if zipped {
            let inner_name = Self::file_name(&inner)?;
            let binding = self.match_writer(&inner_name)?;
            decorators::gzip_writer(Arc::clone(&binding.factory), path)
        } else {
            let binding = self.match_writer(&name)?;
            binding.factory.create_path(path)
        }
    }

    /// The factory a reader resolution would use, without opening
    /// anything. Probes still run when `path` points at a real file.
    pub fn reader_format_name(&self, path: &Path) -> Result<&'static str, PeakIoError> {
        let name = Self::file_name(path)?;
        let probe_target = path.exists().then_some(path);
        Ok(self.match_reader(&name, probe_target)?.factory.format_name())
    }
}

/// The process-wide registry used by [`open_path`] and [`create_path`].
pub fn default_registry() -> &'static Mutex<FormatRegistry> {
    static REGISTRY: OnceLock<Mutex<FormatRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FormatRegistry::with_defaults()))
}

/// Resolve and open a reader for `path` against the default registry.
pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Box<dyn PeakListReader>, PeakIoError> {
    default_registry()
        .lock()
        .unwrap()
        .resolve_reader(path.as_ref())
}

/// Resolve and create a writer for `path` against the default registry.
pub fn create_path<P: AsRef<Path>>(path: P) -> Result<Box<dyn PeakListWriter>, PeakIoError> {
    default_registry()
        .lock()
        .unwrap()
        .resolve_writer(path.as_ref())
}

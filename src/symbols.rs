//! Symbol backend capability and the per-session symbol state built on it
//!
//! The backend is an external collaborator reduced to the three operations the
//! monitor consumes: register a module, resolve an address, and enumerate the
//! named constants of a type. Any backend implementing [`SymbolBackend`] can be
//! plugged in; [`NullSymbols`] resolves nothing and [`ObjectSymbols`] reads
//! symbol and export tables straight from module images on disk.
//!
//! Backend failures are never fatal once ingestion has started. A module that
//! fails to register simply resolves as `module + offset` later on.

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A symbol covering an address, plus the distance from its start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub name: String,
    pub displacement: u64,
}

/// Operations consumed from a symbol engine
pub trait SymbolBackend: Send {
    /// Make the image at `path` (mapped at `base`) available for resolution
    fn register_module(&mut self, base: u64, size: u64, path: &str) -> Result<()>;

    /// Resolve an address to the symbol containing it
    fn resolve_address(&self, address: u64) -> Option<ResolvedSymbol>;

    /// Enumerate `(value, name)` pairs of an enumerated type defined in the
    /// module loaded at `module_base`
    fn enumerate_constants(&self, module_base: u64, type_name: &str) -> Result<Vec<(u32, String)>>;
}

/// Backend with no symbol information; every frame degrades to module + offset
#[derive(Debug, Default)]
pub struct NullSymbols;

impl SymbolBackend for NullSymbols {
    fn register_module(&mut self, _base: u64, _size: u64, _path: &str) -> Result<()> {
        Ok(())
    }

    fn resolve_address(&self, _address: u64) -> Option<ResolvedSymbol> {
        None
    }

    fn enumerate_constants(&self, _module_base: u64, _type_name: &str) -> Result<Vec<(u32, String)>> {
        Ok(Vec::new())
    }
}

/// Symbols of one registered image, sorted by relative address
#[derive(Debug)]
struct ImageSymbols {
    base: u64,
    size: u64,
    symbols: Vec<(u64, String)>,
}

/// Backend that indexes symbol and export tables of module images on disk
///
/// Only public names are available, and there is no type information, so
/// [`SymbolBackend::enumerate_constants`] always comes back empty.
#[derive(Debug, Default)]
pub struct ObjectSymbols {
    search_paths: Vec<PathBuf>,
    images: Vec<ImageSymbols>,
}

impl ObjectSymbols {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            images: Vec::new(),
        }
    }

    /// Locate an image: the path itself, then each search directory by file name
    fn locate(&self, path: &str) -> Option<PathBuf> {
        let direct = Path::new(path);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }

        // NT paths use backslashes regardless of the host platform
        let file_name = path.rsplit(['\\', '/']).next().filter(|n| !n.is_empty())?;
        self.search_paths
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Read the symbol and export tables of an image as relative addresses
    fn load_symbols(image_path: &Path) -> Result<Vec<(u64, String)>> {
        let file = File::open(image_path).map_err(|e| {
            MonitorError::Symbols(format!("Failed to open {}: {}", image_path.display(), e))
        })?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
            MonitorError::Symbols(format!("Failed to map {}: {}", image_path.display(), e))
        })?;

        let object = object::File::parse(&*mmap).map_err(|e| {
            MonitorError::Symbols(format!("Failed to parse {}: {}", image_path.display(), e))
        })?;

        let image_base = object.relative_address_base();
        let mut symbols: Vec<(u64, String)> = object
            .symbols()
            .filter(|sym| sym.is_definition() && sym.kind() == SymbolKind::Text)
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                let rva = sym.address().checked_sub(image_base)?;
                (!name.is_empty()).then(|| (rva, name.to_string()))
            })
            .collect();

        if let Ok(exports) = object.exports() {
            symbols.extend(exports.iter().filter_map(|export| {
                let rva = export.address().checked_sub(image_base)?;
                let name = String::from_utf8_lossy(export.name()).into_owned();
                (!name.is_empty()).then_some((rva, name))
            }));
        }

        symbols.sort();
        symbols.dedup_by_key(|(rva, _)| *rva);
        Ok(symbols)
    }
}

impl SymbolBackend for ObjectSymbols {
    fn register_module(&mut self, base: u64, size: u64, path: &str) -> Result<()> {
        let image_path = self
            .locate(path)
            .ok_or_else(|| MonitorError::Symbols(format!("Image not found: {}", path)))?;

        let symbols = Self::load_symbols(&image_path)?;
        tracing::debug!(
            "indexed {} symbols from {} at {:#x}",
            symbols.len(),
            image_path.display(),
            base
        );

        self.images.push(ImageSymbols {
            base,
            size,
            symbols,
        });
        Ok(())
    }

    fn resolve_address(&self, address: u64) -> Option<ResolvedSymbol> {
        let image = self
            .images
            .iter()
            .find(|image| address >= image.base && address - image.base < image.size)?;

        let rva = address - image.base;
        let index = image.symbols.partition_point(|(start, _)| *start <= rva);
        let (start, name) = image.symbols.get(index.checked_sub(1)?)?;
        Some(ResolvedSymbol {
            name: name.clone(),
            displacement: rva - start,
        })
    }

    fn enumerate_constants(&self, _module_base: u64, _type_name: &str) -> Result<Vec<(u32, String)>> {
        Ok(Vec::new())
    }
}

/// Symbol state for one session: module capture, kernel-base tracking and the
/// lazily built call-number name table
pub struct SymbolSession {
    backend: Box<dyn SymbolBackend>,
    config: MonitorConfig,
    kernel_base: Option<u64>,
    call_names: Option<HashMap<u32, String>>,
}

impl SymbolSession {
    pub fn new(backend: Box<dyn SymbolBackend>, config: MonitorConfig) -> Self {
        Self {
            backend,
            config,
            kernel_base: None,
            call_names: None,
        }
    }

    /// Best-effort registration of a newly loaded module. Returns whether the
    /// backend accepted it; failures only degrade later resolution.
    pub fn capture_module(&mut self, base: u64, size: u64, nt_path: &str) -> bool {
        let path = self.config.normalize_path(nt_path);

        if self.kernel_base.is_none() && self.config.is_kernel_image(&path) {
            tracing::debug!("kernel image {} at {:#x}", path, base);
            self.kernel_base = Some(base);
        }

        match self.backend.register_module(base, size, &path) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("symbol capture skipped for {}: {}", path, e);
                false
            }
        }
    }

    pub fn resolve(&self, address: u64) -> Option<ResolvedSymbol> {
        self.backend.resolve_address(address)
    }

    pub fn kernel_base(&self) -> Option<u64> {
        self.kernel_base
    }

    /// Symbolic name of a secure call number
    ///
    /// The name table is built on first use and never rebuilt, even if it came
    /// back empty.
    pub fn call_name(&mut self, call_number: u16) -> Option<&str> {
        if self.call_names.is_none() {
            self.call_names = Some(self.load_call_names());
        }

        self.call_names
            .as_ref()
            .and_then(|names| names.get(&u32::from(call_number)))
            .map(String::as_str)
    }

    fn load_call_names(&self) -> HashMap<u32, String> {
        let Some(kernel_base) = self.kernel_base else {
            tracing::warn!(
                "kernel image {} was never loaded; secure call names unavailable",
                self.config.kernel_image
            );
            return HashMap::new();
        };

        match self
            .backend
            .enumerate_constants(kernel_base, &self.config.call_name_type)
        {
            Ok(constants) => {
                tracing::debug!(
                    "loaded {} {} names",
                    constants.len(),
                    self.config.call_name_type
                );
                constants.into_iter().collect()
            }
            Err(e) => {
                tracing::warn!(
                    "failed to enumerate {}: {}",
                    self.config.call_name_type,
                    e
                );
                HashMap::new()
            }
        }
    }
}

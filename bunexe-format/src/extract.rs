//! Writing embedded modules to the file system.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bunexe_common::sanitize_virtual_path;

use crate::container::Container;
use crate::error::ContainerError;
use crate::module::Loader;

/// Derives the output path of a module relative to the output directory.
///
/// The virtual path is sanitized with [`sanitize_virtual_path`] and the loader's extension is
/// appended, keeping any extension already present. If nothing usable remains of the name,
/// `module_<index>` is used instead.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use bunexe_format::{module_output_path, Loader};
///
/// assert_eq!(
///     module_output_path("/$bunfs/root/cli.js", Loader::Js, 0),
///     PathBuf::from("root/cli.js.js")
/// );
/// assert_eq!(module_output_path("", Loader::Wasm, 3), PathBuf::from("module_3.wasm"));
/// ```
pub fn module_output_path(name: &str, loader: Loader, index: usize) -> PathBuf {
    match sanitize_virtual_path(name) {
        Some(path) => append_suffix(&path, loader.extension()),
        None => PathBuf::from(format!("module_{}{}", index, loader.extension())),
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(path);
    path.push(suffix);
    path.into()
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), ContainerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// A module written by [`Container::extract_all`].
#[derive(Clone, Debug)]
pub struct ExtractedModule {
    /// Index of the module in the module table.
    pub index: usize,
    /// The virtual path of the module.
    pub name: String,
    /// The loader of the module.
    pub loader: Loader,
    /// Where the contents were written.
    pub path: PathBuf,
    /// Number of content bytes written.
    pub size: usize,
    /// Where the source map was written, if the module has one.
    pub sourcemap_path: Option<PathBuf>,
    /// Where the bytecode was written, if the module has any.
    pub bytecode_path: Option<PathBuf>,
}

/// A failure to extract a single module.
#[derive(Debug)]
pub struct ModuleExtractError {
    /// Index of the module in the module table.
    pub index: usize,
    /// The underlying error.
    pub error: ContainerError,
}

impl fmt::Display for ModuleExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {}: {}", self.index, self.error)
    }
}

/// The outcome of [`Container::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Modules whose contents were written.
    pub extracted: Vec<ExtractedModule>,
    /// Indexes of modules without embedded contents.
    pub skipped: Vec<usize>,
    /// Modules or sidecar files that could not be extracted.
    pub errors: Vec<ModuleExtractError>,
}

impl ExtractReport {
    /// Number of modules whose contents were written.
    pub fn count(&self) -> usize {
        self.extracted.len()
    }
}

impl Container {
    /// Writes all modules below `output_root`.
    ///
    /// Every module with contents is written to its [`module_output_path`]. Source maps are
    /// written next to it with a `.map` suffix and bytecode with a `.bytecode` suffix. Modules
    /// without contents are skipped.
    ///
    /// Failures of individual modules are collected in the report and do not stop the
    /// extraction. Only failing to create `output_root` is an error.
    #[tracing::instrument(level = "debug", skip_all, fields(output = %output_root.as_ref().display()))]
    pub fn extract_all<P>(&self, output_root: P) -> Result<ExtractReport, ContainerError>
    where
        P: AsRef<Path>,
    {
        let output_root = output_root.as_ref();
        fs::create_dir_all(output_root)?;

        let mut report = ExtractReport::default();
        for index in 0..self.module_count() {
            if let Err(error) = self.extract_module(index, output_root, &mut report) {
                tracing::warn!(index, %error, "failed to extract module");
                report.errors.push(ModuleExtractError { index, error });
            }
        }

        tracing::info!(count = report.count(), "extracted modules");
        Ok(report)
    }

    fn extract_module(
        &self,
        index: usize,
        output_root: &Path,
        report: &mut ExtractReport,
    ) -> Result<(), ContainerError> {
        let module = self.module(index)?;
        let name = self.module_name(&module)?.into_owned();

        tracing::debug!(
            index,
            name = %name,
            contents = %module.contents,
            sourcemap = %module.sourcemap,
            bytecode = %module.bytecode,
            module_info = %module.module_info,
            bytecode_origin_path = %module.bytecode_origin_path,
            encoding = %module.encoding,
            loader = %module.loader,
            module_format = module.module_format,
            side = module.side,
            "module"
        );

        let contents = self.module_contents(&module)?;
        if contents.is_empty() {
            tracing::debug!(index, "skipped module without contents");
            report.skipped.push(index);
            return Ok(());
        }

        let path = output_root.join(module_output_path(&name, module.loader, index));
        write_file(&path, contents)?;
        tracing::info!(index, size = contents.len(), path = %path.display(), "saved module");

        let mut extracted = ExtractedModule {
            index,
            name,
            loader: module.loader,
            path,
            size: contents.len(),
            sourcemap_path: None,
            bytecode_path: None,
        };

        if !module.sourcemap.is_empty() {
            let map_path = append_suffix(&extracted.path, ".map");
            match self
                .module_sourcemap(&module)
                .and_then(|data| write_file(&map_path, data))
            {
                Ok(()) => extracted.sourcemap_path = Some(map_path),
                Err(error) => {
                    tracing::warn!(index, %error, "failed to write source map");
                    report.errors.push(ModuleExtractError { index, error });
                }
            }
        }

        if !module.bytecode.is_empty() {
            let bytecode_path = append_suffix(&extracted.path, ".bytecode");
            match self
                .module_bytecode(&module)
                .and_then(|data| write_file(&bytecode_path, data))
            {
                Ok(()) => extracted.bytecode_path = Some(bytecode_path),
                Err(error) => {
                    tracing::warn!(index, %error, "failed to write bytecode");
                    report.errors.push(ModuleExtractError { index, error });
                }
            }
        }

        report.extracted.push(extracted);
        Ok(())
    }
}

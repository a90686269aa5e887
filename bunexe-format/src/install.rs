//! Patching executables on disk with a backup of the original.
//!
//! Before a file is overwritten, its original bytes are durably written to a backup next to it
//! (see [`backup_path`]). If writing the patched file fails afterwards, the backup still holds the
//! original. Patching a file that already has a backup first restores the backup, so repeated
//! patches always start from the original bytes.

use std::error::Error;
use std::fmt;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use bunexe_common::ByteView;

use crate::container::Container;
use crate::error::{ContainerError, ContainerErrorKind, PERMISSION_HINT};

/// Suffix appended to the file name of backups.
pub const BACKUP_SUFFIX: &str = ".original";

/// Returns the path of the backup kept for the given file.
pub fn backup_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut backup = path.as_ref().as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    backup.into()
}

/// Writes `data` to `path` and flushes it to stable storage before returning.
pub fn write_durable(path: &Path, data: &[u8], permissions: &Permissions) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::set_permissions(path, permissions.clone())
}

/// The error type for [`InstallError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallErrorKind {
    /// There is no backup to restore.
    MissingBackup,

    /// Restoring the original from the backup failed.
    RestoreFailed,

    /// The target file could not be read.
    ReadFailed,

    /// The target is not a valid container or cannot be patched.
    Container,

    /// The backup could not be written. The target file is untouched.
    BackupFailed,

    /// The patched file could not be written. The backup holds the original.
    WriteFailed,

    /// The original was restored, but the backup could not be removed.
    CleanupFailed,
}

impl fmt::Display for InstallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBackup => write!(f, "no backup found"),
            Self::RestoreFailed => write!(f, "failed to restore from backup"),
            Self::ReadFailed => write!(f, "failed to read executable"),
            Self::Container => write!(f, "cannot patch executable"),
            Self::BackupFailed => write!(f, "failed to write backup"),
            Self::WriteFailed => write!(f, "failed to write patched executable"),
            Self::CleanupFailed => write!(f, "restored, but failed to remove backup"),
        }
    }
}

/// An error returned when patching or restoring a file on disk.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct InstallError {
    kind: InstallErrorKind,
    permission_denied: bool,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl InstallError {
    /// Creates a new install error from a known kind of error as well as an arbitrary error
    /// payload.
    pub fn new<E>(kind: InstallErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind,
            permission_denied: false,
            source: Some(source.into()),
        }
    }

    fn io(kind: InstallErrorKind, source: io::Error) -> Self {
        let permission_denied = source.kind() == io::ErrorKind::PermissionDenied;
        Self {
            permission_denied,
            ..Self::new(kind, source)
        }
    }

    /// Returns the corresponding [`InstallErrorKind`] for this error.
    pub fn kind(&self) -> InstallErrorKind {
        self.kind
    }

    /// Returns `true` if the original bytes are still available after this error.
    ///
    /// This is the case when only writing the patched file failed after the backup was written.
    pub fn is_recoverable(&self) -> bool {
        self.kind == InstallErrorKind::WriteFailed
    }

    /// Returns a remediation hint for errors caused by missing permissions.
    pub fn hint(&self) -> Option<&'static str> {
        if self.permission_denied {
            Some(PERMISSION_HINT)
        } else {
            None
        }
    }
}

impl From<InstallErrorKind> for InstallError {
    fn from(kind: InstallErrorKind) -> Self {
        Self {
            kind,
            permission_denied: false,
            source: None,
        }
    }
}

impl From<ContainerError> for InstallError {
    fn from(source: ContainerError) -> Self {
        Self {
            permission_denied: source.kind() == ContainerErrorKind::PermissionDenied,
            ..Self::new(InstallErrorKind::Container, source)
        }
    }
}

/// Selects the module to patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSelector {
    /// The module at an index of the module table.
    Index(usize),
    /// The first module with the given virtual path.
    Name(String),
}

/// Describes a substitution in the contents of one module.
#[derive(Clone, Debug)]
pub struct PatchRequest {
    /// The module to patch.
    pub module: ModuleSelector,
    /// The bytes to locate in the module contents.
    pub marker: Vec<u8>,
    /// The bytes written over the marker. Must not be longer than the marker.
    pub replacement: Vec<u8>,
}

/// The result of [`patch_file`].
#[derive(Clone, Debug)]
pub struct PatchOutcome {
    /// Where the original bytes were saved.
    pub backup_path: PathBuf,
    /// Whether an existing backup was restored before patching.
    pub restored: bool,
    /// Index of the patched module.
    pub module_index: usize,
    /// Virtual path of the patched module.
    pub module_name: String,
    /// Offset of the marker within the module contents.
    pub marker_offset: usize,
    /// Size of the written file.
    pub size: usize,
}

fn restore_from(backup: &Path, path: &Path) -> Result<(), InstallError> {
    let permissions = fs::metadata(backup)
        .map_err(|e| InstallError::io(InstallErrorKind::RestoreFailed, e))?
        .permissions();
    let original =
        ByteView::open(backup).map_err(|e| InstallError::io(InstallErrorKind::RestoreFailed, e))?;

    write_durable(path, &original, &permissions)
        .map_err(|e| InstallError::io(InstallErrorKind::RestoreFailed, e))
}

/// Patches a module of the executable at `path`, keeping a backup of the original.
///
/// The steps are:
///
///  1. Restore the original from an existing backup.
///  2. Decode the container and prepare the patch. Nothing is written if this fails.
///  3. Durably write the original bytes to [`backup_path`].
///  4. Durably write the patched bytes to `path`, keeping its permissions.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn patch_file<P>(path: P, request: &PatchRequest) -> Result<PatchOutcome, InstallError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let backup = backup_path(path);

    let restored = backup.exists();
    if restored {
        tracing::info!(backup = %backup.display(), "restoring original before patching");
        restore_from(&backup, path)?;
    }

    let permissions = fs::metadata(path)
        .map_err(|e| InstallError::io(InstallErrorKind::ReadFailed, e))?
        .permissions();

    let container = Container::open(path)?;
    let (module_index, module) = match request.module {
        ModuleSelector::Index(index) => (index, container.module(index)?),
        ModuleSelector::Name(ref name) => container.find_module(name)?.ok_or_else(|| {
            InstallError::new(
                InstallErrorKind::Container,
                format!("module {:?} not found", name),
            )
        })?,
    };
    let module_name = container.module_name(&module)?.into_owned();
    tracing::debug!(
        module_index,
        module_name = %module_name,
        size = module.contents.length,
        loader = %module.loader,
        encoding = %module.encoding,
        "selected module"
    );

    let patch = container.prepare_patch(module_index, &request.marker, &request.replacement)?;
    let original =
        fs::read(path).map_err(|e| InstallError::io(InstallErrorKind::ReadFailed, e))?;
    let patched = patch.apply(&original)?;

    write_durable(&backup, &original, &permissions)
        .map_err(|e| InstallError::io(InstallErrorKind::BackupFailed, e))?;
    tracing::info!(backup = %backup.display(), "wrote backup");

    write_durable(path, &patched, &permissions)
        .map_err(|e| InstallError::io(InstallErrorKind::WriteFailed, e))?;
    tracing::info!(
        module_index,
        marker_offset = patch.marker_offset(),
        "patched executable"
    );

    Ok(PatchOutcome {
        backup_path: backup,
        restored,
        module_index,
        module_name,
        marker_offset: patch.marker_offset(),
        size: patched.len(),
    })
}

/// Restores the executable at `path` from its backup and removes the backup.
///
/// Returns the path of the removed backup.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn restore_file<P>(path: P) -> Result<PathBuf, InstallError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let backup = backup_path(path);
    if !backup.exists() {
        return Err(InstallError::new(
            InstallErrorKind::MissingBackup,
            format!("{} does not exist", backup.display()),
        ));
    }

    restore_from(&backup, path)?;
    tracing::info!(backup = %backup.display(), "restored original");

    fs::remove_file(&backup).map_err(|e| InstallError::io(InstallErrorKind::CleanupFailed, e))?;
    Ok(backup)
}

use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

/// Remediation shown along with permission errors.
pub const PERMISSION_HINT: &str = "try re-running with elevated privileges (e.g. sudo)";

/// The broad class of a [`ContainerErrorKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The file is not a container or its structures are damaged.
    Format,
    /// The container is readable, but a requested operation violates a layout constraint.
    Constraint,
    /// Reading or writing failed.
    Io,
    /// Reading or writing failed due to missing permissions.
    Permission,
}

/// The error type for [`ContainerError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerErrorKind {
    /// The trailer was not found in the file.
    MissingTrailer,

    /// A fixed-size structure or the blob extends past the available data.
    TruncatedInput,

    /// The header describes a blob that cannot exist in this file.
    CorruptContainer,

    /// A string pointer addresses bytes outside of the blob.
    PointerOutOfBounds,

    /// A module index is outside of the module table.
    IndexOutOfRange,

    /// The module table length is not a multiple of the record size.
    MalformedModuleTable,

    /// The patch marker does not occur in the module contents.
    MarkerNotFound,

    /// The patch replacement does not fit into the marker.
    ReplacementTooLarge,

    /// Generic IO error.
    Io,

    /// Access to the file was denied.
    PermissionDenied,
}

impl ContainerErrorKind {
    /// Returns the category this kind of error belongs to.
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::MissingTrailer
            | Self::TruncatedInput
            | Self::CorruptContainer
            | Self::PointerOutOfBounds
            | Self::IndexOutOfRange => ErrorCategory::Format,
            Self::MalformedModuleTable | Self::MarkerNotFound | Self::ReplacementTooLarge => {
                ErrorCategory::Constraint
            }
            Self::Io => ErrorCategory::Io,
            Self::PermissionDenied => ErrorCategory::Permission,
        }
    }
}

impl fmt::Display for ContainerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrailer => write!(f, "module graph trailer not found"),
            Self::TruncatedInput => write!(f, "unexpected end of container data"),
            Self::CorruptContainer => write!(f, "corrupt container"),
            Self::PointerOutOfBounds => write!(f, "string pointer out of bounds"),
            Self::IndexOutOfRange => write!(f, "module index out of range"),
            Self::MalformedModuleTable => write!(f, "malformed module table"),
            Self::MarkerNotFound => write!(f, "marker not found in module contents"),
            Self::ReplacementTooLarge => write!(f, "replacement is larger than the marker"),
            Self::Io => write!(f, "i/o error"),
            Self::PermissionDenied => write!(f, "permission denied ({})", PERMISSION_HINT),
        }
    }
}

/// An error returned when handling a [`Container`](crate::Container).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ContainerError {
    kind: ContainerErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ContainerError {
    /// Creates a new container error from a known kind of error as well as an arbitrary error
    /// payload.
    pub fn new<E>(kind: ContainerErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ContainerErrorKind`] for this error.
    pub fn kind(&self) -> ContainerErrorKind {
        self.kind
    }
}

impl From<ContainerErrorKind> for ContainerError {
    fn from(kind: ContainerErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<io::Error> for ContainerError {
    fn from(source: io::Error) -> Self {
        let kind = match source.kind() {
            io::ErrorKind::UnexpectedEof => ContainerErrorKind::TruncatedInput,
            io::ErrorKind::PermissionDenied => ContainerErrorKind::PermissionDenied,
            _ => ContainerErrorKind::Io,
        };
        Self::new(kind, source)
    }
}

impl From<scroll::Error> for ContainerError {
    fn from(source: scroll::Error) -> Self {
        Self::new(ContainerErrorKind::TruncatedInput, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kinds() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        assert_eq!(
            ContainerError::from(eof).kind(),
            ContainerErrorKind::TruncatedInput
        );

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let error = ContainerError::from(denied);
        assert_eq!(error.kind().category(), ErrorCategory::Permission);
        assert!(error.to_string().contains("sudo"));
    }

    #[test]
    fn test_source_is_kept() {
        let error = ContainerError::new(ContainerErrorKind::IndexOutOfRange, "index 7 of 3");
        assert_eq!(error.source().map(ToString::to_string).as_deref(), Some("index 7 of 3"));
    }
}

//! Fixed-size structures at the end of the module graph.

use std::fmt;
use std::ops::Range;

use bytes::Bytes;
use scroll::{Pread, Pwrite, SizeWith};

use crate::error::{ContainerError, ContainerErrorKind};

/// The trailer closing the module graph of a compiled executable.
pub const TRAILER: &[u8] = b"\n---- Bun! ----\n";

/// Size of the encoded [`Header`].
pub const HEADER_SIZE: usize = 32;

/// A span of bytes relative to the start of the blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pread, Pwrite, SizeWith)]
#[repr(C)]
pub struct StringPointer {
    /// Offset of the first byte from the start of the blob.
    pub offset: u32,
    /// Number of bytes.
    pub length: u32,
}

impl StringPointer {
    /// Creates a pointer spanning `length` bytes at `offset`.
    pub fn new(offset: u32, length: u32) -> Self {
        StringPointer { offset, length }
    }

    /// Returns `true` if the pointer addresses no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the addressed range, or `None` if it overflows `usize`.
    pub fn range(&self) -> Option<Range<usize>> {
        let start = usize::try_from(self.offset).ok()?;
        let end = start.checked_add(usize::try_from(self.length).ok()?)?;
        Some(start..end)
    }

    /// Resolves the pointer against a buffer.
    ///
    /// Empty pointers resolve to an empty slice regardless of their offset. A span reaching past
    /// the end of `buf` is an error, it is never truncated.
    pub fn resolve<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8], ContainerError> {
        if self.is_empty() {
            return Ok(&[]);
        }

        self.range()
            .and_then(|range| buf.get(range))
            .ok_or_else(|| self.out_of_bounds(buf.len()))
    }

    /// Resolves the pointer against a shared buffer without copying.
    pub fn slice(&self, bytes: &Bytes) -> Result<Bytes, ContainerError> {
        if self.is_empty() {
            return Ok(Bytes::new());
        }

        match self.range() {
            Some(range) if range.end <= bytes.len() => Ok(bytes.slice(range)),
            _ => Err(self.out_of_bounds(bytes.len())),
        }
    }

    fn out_of_bounds(&self, len: usize) -> ContainerError {
        ContainerError::new(
            ContainerErrorKind::PointerOutOfBounds,
            format!("{} exceeds a buffer of {} bytes", self, len),
        )
    }
}

impl fmt::Display for StringPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset={}, length={}", self.offset, self.length)
    }
}

/// The header immediately preceding the trailer.
///
/// Layout (little-endian):
///
/// ```txt
/// byte_count       u64
/// modules          StringPointer
/// entry_point_id   u32
/// exec_argv        StringPointer
/// flags            u32
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, Pwrite, SizeWith)]
#[repr(C)]
pub struct Header {
    /// Size of the blob preceding the header.
    pub byte_count: u64,
    /// Location of the module table in the blob.
    pub modules: StringPointer,
    /// Index of the module executed on startup.
    pub entry_point_id: u32,
    /// Location of the argv the executable was compiled with.
    pub exec_argv: StringPointer,
    /// Compile flags.
    pub flags: u32,
}

impl Header {
    /// Decodes a header from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        if data.len() < HEADER_SIZE {
            return Err(ContainerError::new(
                ContainerErrorKind::TruncatedInput,
                format!("header needs {} bytes, got {}", HEADER_SIZE, data.len()),
            ));
        }

        Ok(data.pread_with(0, scroll::LE)?)
    }

    /// Encodes the header into its wire representation.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE], ContainerError> {
        let mut buf = [0; HEADER_SIZE];
        buf[..].pwrite_with(*self, 0, scroll::LE)?;
        Ok(buf)
    }

    /// Computes the file offset of the blob from the file offset of this header.
    pub fn blob_start(&self, header_offset: u64) -> Result<u64, ContainerError> {
        header_offset.checked_sub(self.byte_count).ok_or_else(|| {
            ContainerError::new(
                ContainerErrorKind::CorruptContainer,
                format!(
                    "blob of {} bytes does not fit before the header at {}",
                    self.byte_count, header_offset
                ),
            )
        })
    }
}

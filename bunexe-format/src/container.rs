//! Decoding of the module graph appended to compiled executables.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::ops::Range;
use std::path::Path;

use bytes::Bytes;

use crate::error::{ContainerError, ContainerErrorKind};
use crate::header::{Header, StringPointer, HEADER_SIZE};
use crate::module::{ModuleRecord, RECORD_SIZE};
use crate::trailer::find_trailer;

/// Reads the blob preceding the header at `header_offset`.
///
/// The blob is the buffer all [`StringPointer`]s of the header and module table resolve against.
pub fn load_blob<R>(reader: &mut R, header_offset: u64, header: &Header) -> Result<Bytes, ContainerError>
where
    R: Read + Seek,
{
    let blob_start = header.blob_start(header_offset)?;
    let byte_count = usize::try_from(header.byte_count).map_err(|e| {
        ContainerError::new(ContainerErrorKind::CorruptContainer, e)
    })?;

    let mut blob = vec![0; byte_count];
    reader.seek(SeekFrom::Start(blob_start))?;
    reader.read_exact(&mut blob)?;

    Ok(blob.into())
}

/// The decoded module graph of a compiled executable.
///
/// The file is laid out as follows, where all pointers are relative to the start of the blob:
///
/// ```txt
/// native code | blob (byte_count bytes) | header (32 bytes) | trailer | ...
/// ```
///
/// A `Container` is immutable. Patching produces new buffers and leaves the container untouched.
#[derive(Clone, Debug)]
pub struct Container {
    blob: Bytes,
    module_table: Bytes,
    blob_start: u64,
    trailer_offset: u64,
    header: Header,
    module_count: usize,
}

impl Container {
    /// Opens and decodes the compiled executable at the given path.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let file = File::open(path)?;
        Self::from_reader(&mut BufReader::new(file))
    }

    /// Decodes a compiled executable held in memory.
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        Self::from_reader(&mut Cursor::new(data))
    }

    /// Decodes a compiled executable from a seekable reader.
    ///
    /// Only the trailer scan window, the header and the blob are read. Decoding fails before
    /// anything is returned if any of the structures is damaged.
    pub fn from_reader<R>(reader: &mut R) -> Result<Self, ContainerError>
    where
        R: Read + Seek,
    {
        let trailer_offset = find_trailer(reader)?.ok_or(ContainerErrorKind::MissingTrailer)?;
        tracing::debug!(trailer_offset, "found trailer");

        let header_offset = trailer_offset
            .checked_sub(HEADER_SIZE as u64)
            .ok_or_else(|| {
                ContainerError::new(
                    ContainerErrorKind::TruncatedInput,
                    "no room for the header before the trailer",
                )
            })?;

        let mut header_bytes = [0; HEADER_SIZE];
        reader.seek(SeekFrom::Start(header_offset))?;
        reader.read_exact(&mut header_bytes)?;
        let header = Header::parse(&header_bytes)?;

        tracing::debug!(
            byte_count = header.byte_count,
            modules = %header.modules,
            entry_point_id = header.entry_point_id,
            exec_argv = %header.exec_argv,
            flags = format_args!("{:#b}", header.flags),
            "decoded header"
        );

        let blob_start = header.blob_start(header_offset)?;
        let blob = load_blob(reader, header_offset, &header)?;
        let module_table = header.modules.slice(&blob)?;

        if module_table.len() % RECORD_SIZE != 0 {
            return Err(ContainerError::new(
                ContainerErrorKind::MalformedModuleTable,
                format!(
                    "module table of {} bytes is not a multiple of {}",
                    module_table.len(),
                    RECORD_SIZE
                ),
            ));
        }

        let module_count = module_table.len() / RECORD_SIZE;
        tracing::debug!(blob_start, module_count, "loaded blob");

        Ok(Container {
            blob,
            module_table,
            blob_start,
            trailer_offset,
            header,
            module_count,
        })
    }

    /// Returns the decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the blob all pointers resolve against.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub(crate) fn blob_bytes(&self) -> &Bytes {
        &self.blob
    }

    /// Returns the raw bytes of the module table.
    pub fn module_table(&self) -> &[u8] {
        &self.module_table
    }

    /// File offset of the first byte of the blob.
    pub fn blob_start(&self) -> u64 {
        self.blob_start
    }

    /// File offset of the header.
    pub fn header_offset(&self) -> u64 {
        self.blob_start + self.header.byte_count
    }

    /// File offset of the first trailer byte.
    pub fn trailer_offset(&self) -> u64 {
        self.trailer_offset
    }

    /// Number of records in the module table.
    pub fn module_count(&self) -> usize {
        self.module_count
    }

    /// Resolves a pointer against the blob.
    pub fn resolve(&self, pointer: StringPointer) -> Result<&[u8], ContainerError> {
        pointer.resolve(&self.blob)
    }

    /// Returns the argv the executable was compiled with, with invalid UTF-8 replaced.
    pub fn exec_argv(&self) -> Result<Cow<'_, str>, ContainerError> {
        self.resolve(self.header.exec_argv)
            .map(String::from_utf8_lossy)
    }

    /// Decodes the module record at the given index.
    pub fn module(&self, index: usize) -> Result<ModuleRecord, ContainerError> {
        if index >= self.module_count {
            return Err(ContainerError::new(
                ContainerErrorKind::IndexOutOfRange,
                format!("module index {} out of range [0, {})", index, self.module_count),
            ));
        }

        let start = index * RECORD_SIZE;
        let data = self
            .module_table
            .get(start..start + RECORD_SIZE)
            .ok_or_else(|| {
                ContainerError::new(
                    ContainerErrorKind::IndexOutOfRange,
                    format!("module index {} exceeds the module table", index),
                )
            })?;

        ModuleRecord::parse(data)
    }

    /// Returns an iterator over all module records.
    pub fn modules(&self) -> ModuleIterator<'_> {
        ModuleIterator {
            container: self,
            indexes: 0..self.module_count,
        }
    }

    /// Returns the virtual path of a module, with invalid UTF-8 replaced.
    pub fn module_name(&self, module: &ModuleRecord) -> Result<Cow<'_, str>, ContainerError> {
        self.resolve(module.name).map(String::from_utf8_lossy)
    }

    /// Returns the contents of a module.
    pub fn module_contents(&self, module: &ModuleRecord) -> Result<&[u8], ContainerError> {
        self.resolve(module.contents)
    }

    /// Returns the source map of a module, or an empty slice.
    pub fn module_sourcemap(&self, module: &ModuleRecord) -> Result<&[u8], ContainerError> {
        self.resolve(module.sourcemap)
    }

    /// Returns the bytecode of a module, or an empty slice.
    pub fn module_bytecode(&self, module: &ModuleRecord) -> Result<&[u8], ContainerError> {
        self.resolve(module.bytecode)
    }

    /// Returns the absolute file range holding the contents of a module.
    pub fn contents_file_range(&self, module: &ModuleRecord) -> Range<u64> {
        let start = self.blob_start + u64::from(module.contents.offset);
        start..start + u64::from(module.contents.length)
    }

    /// Returns the first module with the given virtual path, along with its index.
    pub fn find_module(&self, name: &str) -> Result<Option<(usize, ModuleRecord)>, ContainerError> {
        for (index, module) in self.modules().enumerate() {
            let module = module?;
            if self.module_name(&module)? == name {
                return Ok(Some((index, module)));
            }
        }

        Ok(None)
    }
}

/// An iterator over the records of a [`Container`].
pub struct ModuleIterator<'a> {
    container: &'a Container,
    indexes: Range<usize>,
}

impl Iterator for ModuleIterator<'_> {
    type Item = Result<ModuleRecord, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.indexes.next()?;
        Some(self.container.module(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indexes.size_hint()
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let index = self.indexes.nth(n)?;
        Some(self.container.module(index))
    }
}

impl DoubleEndedIterator for ModuleIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let index = self.indexes.next_back()?;
        Some(self.container.module(index))
    }
}

impl FusedIterator for ModuleIterator<'_> {}

impl ExactSizeIterator for ModuleIterator<'_> {}

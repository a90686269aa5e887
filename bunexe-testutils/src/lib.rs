//! Test helpers for `bunexe`.
//!
//! Instead of checking in compiled executables as fixtures, tests assemble synthetic containers
//! with [`ContainerBuilder`]. The builder encodes the wire format independently of the codec, so
//! decoding bugs are not mirrored by the fixtures.
#![warn(missing_docs)]

use std::ops::Range;

/// The trailer closing every container.
pub const TRAILER: &[u8] = b"\n---- Bun! ----\n";

/// Size of the encoded header.
pub const HEADER_SIZE: usize = 32;

/// Size of one encoded module record.
pub const RECORD_SIZE: usize = 52;

/// A module to be placed into a synthetic container.
#[derive(Clone, Debug, Default)]
pub struct TestModule {
    name: Vec<u8>,
    contents: Vec<u8>,
    sourcemap: Vec<u8>,
    bytecode: Vec<u8>,
    module_info: Vec<u8>,
    bytecode_origin_path: Vec<u8>,
    encoding: u8,
    loader: u8,
    module_format: u8,
    side: u8,
}

impl TestModule {
    /// Creates a JavaScript module with UTF-8 encoding.
    pub fn new(name: impl Into<Vec<u8>>, contents: impl Into<Vec<u8>>) -> Self {
        TestModule {
            name: name.into(),
            contents: contents.into(),
            encoding: 2,
            loader: 1,
            ..Default::default()
        }
    }

    /// Sets the raw loader value.
    pub fn loader(mut self, loader: u8) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the raw encoding value.
    pub fn encoding(mut self, encoding: u8) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the raw module format and side values.
    pub fn format(mut self, module_format: u8, side: u8) -> Self {
        self.module_format = module_format;
        self.side = side;
        self
    }

    /// Attaches a source map.
    pub fn sourcemap(mut self, sourcemap: impl Into<Vec<u8>>) -> Self {
        self.sourcemap = sourcemap.into();
        self
    }

    /// Attaches bytecode and the path it was compiled from.
    pub fn bytecode(mut self, bytecode: impl Into<Vec<u8>>, origin: impl Into<Vec<u8>>) -> Self {
        self.bytecode = bytecode.into();
        self.bytecode_origin_path = origin.into();
        self
    }

    /// Attaches opaque module info.
    pub fn module_info(mut self, module_info: impl Into<Vec<u8>>) -> Self {
        self.module_info = module_info.into();
        self
    }
}

/// A container assembled by [`ContainerBuilder`], along with the positions of its parts.
#[derive(Clone, Debug)]
pub struct BuiltContainer {
    /// The complete file.
    pub bytes: Vec<u8>,
    /// File offset of the first blob byte.
    pub blob_start: usize,
    /// Number of bytes in the blob.
    pub byte_count: usize,
    /// File offset of the header.
    pub header_offset: usize,
    /// File offset of the trailer.
    pub trailer_offset: usize,
    /// File ranges of every module's contents, in module order.
    pub content_ranges: Vec<Range<usize>>,
}

impl BuiltContainer {
    /// Returns the contents of the given module as stored in the file.
    pub fn contents(&self, index: usize) -> &[u8] {
        &self.bytes[self.content_ranges[index].clone()]
    }
}

/// Assembles executables carrying a module graph in the layout
/// `prefix | blob | header | trailer | suffix`.
#[derive(Clone, Debug)]
pub struct ContainerBuilder {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
    modules: Vec<TestModule>,
    entry_point_id: u32,
    argv: Vec<u8>,
    flags: u32,
    table_len: Option<u32>,
    byte_count: Option<usize>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    /// Creates a builder with a small fake native code prefix and no modules.
    pub fn new() -> Self {
        ContainerBuilder {
            prefix: b"\x7fELF\x02\x01\x01\0native code goes here\0".to_vec(),
            suffix: Vec::new(),
            modules: Vec::new(),
            entry_point_id: 0,
            argv: Vec::new(),
            flags: 0,
            table_len: None,
            byte_count: None,
        }
    }

    /// Replaces the bytes preceding the blob.
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets bytes following the trailer, such as a code signature.
    pub fn suffix(mut self, suffix: impl Into<Vec<u8>>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Appends a module.
    pub fn module(mut self, module: TestModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Sets the entry point id and flags of the header.
    pub fn entry_point(mut self, entry_point_id: u32, flags: u32) -> Self {
        self.entry_point_id = entry_point_id;
        self.flags = flags;
        self
    }

    /// Sets the compile-time argv data.
    pub fn argv(mut self, argv: impl Into<Vec<u8>>) -> Self {
        self.argv = argv.into();
        self
    }

    /// Overrides the module table length declared in the header.
    ///
    /// The blob is padded so that the declared range stays in bounds.
    pub fn declared_table_len(mut self, len: u32) -> Self {
        self.table_len = Some(len);
        self
    }

    /// Pads the blob with zeros to exactly `byte_count` bytes.
    ///
    /// Panics on build if the blob is already larger.
    pub fn byte_count(mut self, byte_count: usize) -> Self {
        self.byte_count = Some(byte_count);
        self
    }

    /// Encodes the container.
    pub fn build(&self) -> BuiltContainer {
        let mut blob = Vec::new();
        let mut records = Vec::new();
        let mut content_offsets = Vec::new();

        for module in &self.modules {
            let name = push_data(&mut blob, &module.name);
            let contents = push_data(&mut blob, &module.contents);
            let sourcemap = push_data(&mut blob, &module.sourcemap);
            let bytecode = push_data(&mut blob, &module.bytecode);
            let module_info = push_data(&mut blob, &module.module_info);
            let origin = push_data(&mut blob, &module.bytecode_origin_path);
            content_offsets.push(contents);

            for (offset, len) in [name, contents, sourcemap, bytecode, module_info, origin] {
                records.extend_from_slice(&offset.to_le_bytes());
                records.extend_from_slice(&len.to_le_bytes());
            }
            records.extend_from_slice(&[
                module.encoding,
                module.loader,
                module.module_format,
                module.side,
            ]);
        }

        let (table_offset, actual_len) = push_data(&mut blob, &records);
        let table_len = self.table_len.unwrap_or(actual_len);
        let (argv_offset, argv_len) = push_data(&mut blob, &self.argv);

        let table_end = (table_offset + table_len) as usize;
        if blob.len() < table_end {
            blob.resize(table_end, 0);
        }

        if let Some(byte_count) = self.byte_count {
            assert!(
                blob.len() <= byte_count,
                "blob needs {} bytes but byte_count is {}",
                blob.len(),
                byte_count
            );
            blob.resize(byte_count, 0);
        }

        let mut bytes = self.prefix.clone();
        let blob_start = bytes.len();
        bytes.extend_from_slice(&blob);

        let header_offset = bytes.len();
        bytes.extend_from_slice(&(blob.len() as u64).to_le_bytes());
        for value in [
            table_offset,
            table_len,
            self.entry_point_id,
            argv_offset,
            argv_len,
            self.flags,
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let trailer_offset = bytes.len();
        bytes.extend_from_slice(TRAILER);
        bytes.extend_from_slice(&self.suffix);

        let content_ranges = content_offsets
            .into_iter()
            .map(|(offset, len)| {
                let start = blob_start + offset as usize;
                start..start + len as usize
            })
            .collect();

        BuiltContainer {
            bytes,
            blob_start,
            byte_count: blob.len(),
            header_offset,
            trailer_offset,
            content_ranges,
        }
    }
}

fn push_data(blob: &mut Vec<u8>, data: &[u8]) -> (u32, u32) {
    let offset = blob.len() as u32;
    blob.extend_from_slice(data);
    (offset, data.len() as u32)
}

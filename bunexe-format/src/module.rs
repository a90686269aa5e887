//! Module records of the module table.

use std::fmt;

use scroll::{Pread, Pwrite, SizeWith};

use crate::error::{ContainerError, ContainerErrorKind};
use crate::header::StringPointer;

/// Size of an encoded [`ModuleRecord`].
pub const RECORD_SIZE: usize = 52;

/// The text encoding of a module's contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Opaque binary data.
    Binary,
    /// Latin-1 text.
    Latin1,
    /// UTF-8 text.
    Utf8,
    /// An encoding not known to this library.
    Unknown(u8),
}

impl Encoding {
    /// Returns the display name of this encoding.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Latin1 => "latin1",
            Encoding::Utf8 => "utf8",
            Encoding::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for Encoding {
    fn from(value: u8) -> Self {
        match value {
            0 => Encoding::Binary,
            1 => Encoding::Latin1,
            2 => Encoding::Utf8,
            other => Encoding::Unknown(other),
        }
    }
}

impl From<Encoding> for u8 {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => 0,
            Encoding::Latin1 => 1,
            Encoding::Utf8 => 2,
            Encoding::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), u8::from(*self))
    }
}

/// Specifies how the contents of a module are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Loader {
    /// JavaScript with JSX.
    Jsx,
    /// JavaScript.
    Js,
    /// TypeScript.
    Ts,
    /// TypeScript with JSX.
    Tsx,
    /// A stylesheet.
    Css,
    /// An opaque file asset.
    File,
    /// JSON.
    Json,
    /// JSON with comments.
    Jsonc,
    /// TOML.
    Toml,
    /// WebAssembly.
    Wasm,
    /// A native Node-API addon.
    Napi,
    /// Base64 encoded data.
    Base64,
    /// A data URL.
    DataUrl,
    /// Plain text.
    Text,
    /// A shell script.
    Bunsh,
    /// A SQLite database.
    Sqlite,
    /// A SQLite database embedded into the executable.
    SqliteEmbedded,
    /// HTML.
    Html,
    /// YAML.
    Yaml,
    /// JSON5.
    Json5,
    /// Markdown.
    Md,
    /// A loader not known to this library.
    Unknown(u8),
}

impl Loader {
    /// Returns the display name of this loader.
    pub fn name(self) -> &'static str {
        match self {
            Loader::Jsx => "jsx",
            Loader::Js => "js",
            Loader::Ts => "ts",
            Loader::Tsx => "tsx",
            Loader::Css => "css",
            Loader::File => "file",
            Loader::Json => "json",
            Loader::Jsonc => "jsonc",
            Loader::Toml => "toml",
            Loader::Wasm => "wasm",
            Loader::Napi => "napi",
            Loader::Base64 => "base64",
            Loader::DataUrl => "dataurl",
            Loader::Text => "text",
            Loader::Bunsh => "bunsh",
            Loader::Sqlite => "sqlite",
            Loader::SqliteEmbedded => "sqlite_embedded",
            Loader::Html => "html",
            Loader::Yaml => "yaml",
            Loader::Json5 => "json5",
            Loader::Md => "md",
            Loader::Unknown(_) => "unknown",
        }
    }

    /// Returns the canonical file extension, including the leading dot.
    ///
    /// Unknown loaders map to `.bin`.
    pub fn extension(self) -> &'static str {
        match self {
            Loader::Jsx => ".jsx",
            Loader::Js => ".js",
            Loader::Ts => ".ts",
            Loader::Tsx => ".tsx",
            Loader::Css => ".css",
            Loader::Json => ".json",
            Loader::Jsonc => ".jsonc",
            Loader::Toml => ".toml",
            Loader::Wasm => ".wasm",
            Loader::Napi => ".node",
            Loader::Base64 => ".b64",
            Loader::DataUrl | Loader::Text => ".txt",
            Loader::Bunsh => ".sh",
            Loader::Sqlite | Loader::SqliteEmbedded => ".sqlite",
            Loader::Html => ".html",
            Loader::Yaml => ".yaml",
            Loader::Json5 => ".json5",
            Loader::Md => ".md",
            Loader::File | Loader::Unknown(_) => ".bin",
        }
    }

    /// Returns `true` for JavaScript and TypeScript sources.
    pub fn is_script(self) -> bool {
        matches!(self, Loader::Jsx | Loader::Js | Loader::Ts | Loader::Tsx)
    }
}

impl From<u8> for Loader {
    fn from(value: u8) -> Self {
        match value {
            0 => Loader::Jsx,
            1 => Loader::Js,
            2 => Loader::Ts,
            3 => Loader::Tsx,
            4 => Loader::Css,
            5 => Loader::File,
            6 => Loader::Json,
            7 => Loader::Jsonc,
            8 => Loader::Toml,
            9 => Loader::Wasm,
            10 => Loader::Napi,
            11 => Loader::Base64,
            12 => Loader::DataUrl,
            13 => Loader::Text,
            14 => Loader::Bunsh,
            15 => Loader::Sqlite,
            16 => Loader::SqliteEmbedded,
            17 => Loader::Html,
            18 => Loader::Yaml,
            19 => Loader::Json5,
            20 => Loader::Md,
            other => Loader::Unknown(other),
        }
    }
}

impl From<Loader> for u8 {
    fn from(loader: Loader) -> Self {
        match loader {
            Loader::Jsx => 0,
            Loader::Js => 1,
            Loader::Ts => 2,
            Loader::Tsx => 3,
            Loader::Css => 4,
            Loader::File => 5,
            Loader::Json => 6,
            Loader::Jsonc => 7,
            Loader::Toml => 8,
            Loader::Wasm => 9,
            Loader::Napi => 10,
            Loader::Base64 => 11,
            Loader::DataUrl => 12,
            Loader::Text => 13,
            Loader::Bunsh => 14,
            Loader::Sqlite => 15,
            Loader::SqliteEmbedded => 16,
            Loader::Html => 17,
            Loader::Yaml => 18,
            Loader::Json5 => 19,
            Loader::Md => 20,
            Loader::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), u8::from(*self))
    }
}

/// The wire representation of a module record.
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
#[repr(C)]
struct RawModuleRecord {
    name: StringPointer,
    contents: StringPointer,
    sourcemap: StringPointer,
    bytecode: StringPointer,
    module_info: StringPointer,
    bytecode_origin_path: StringPointer,
    encoding: u8,
    loader: u8,
    module_format: u8,
    side: u8,
}

/// A decoded entry of the module table.
///
/// All pointers are relative to the blob of the [`Container`](crate::Container) the record was
/// read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleRecord {
    /// The virtual path of the module.
    pub name: StringPointer,
    /// The module contents.
    pub contents: StringPointer,
    /// The source map of the module, if any.
    pub sourcemap: StringPointer,
    /// Precompiled bytecode, if any.
    pub bytecode: StringPointer,
    /// Opaque module info.
    pub module_info: StringPointer,
    /// The path the bytecode was compiled from.
    pub bytecode_origin_path: StringPointer,
    /// Encoding of the contents.
    pub encoding: Encoding,
    /// How the contents are interpreted.
    pub loader: Loader,
    /// The raw module format (e.g. ESM or CommonJS).
    pub module_format: u8,
    /// The raw side (e.g. server or client).
    pub side: u8,
}

impl ModuleRecord {
    /// Decodes a record from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        if data.len() < RECORD_SIZE {
            return Err(ContainerError::new(
                ContainerErrorKind::TruncatedInput,
                format!("module record needs {} bytes, got {}", RECORD_SIZE, data.len()),
            ));
        }

        let raw = data.pread_with::<RawModuleRecord>(0, scroll::LE)?;
        Ok(ModuleRecord {
            name: raw.name,
            contents: raw.contents,
            sourcemap: raw.sourcemap,
            bytecode: raw.bytecode,
            module_info: raw.module_info,
            bytecode_origin_path: raw.bytecode_origin_path,
            encoding: raw.encoding.into(),
            loader: raw.loader.into(),
            module_format: raw.module_format,
            side: raw.side,
        })
    }

    /// Encodes the record into its wire representation.
    pub fn to_bytes(&self) -> Result<[u8; RECORD_SIZE], ContainerError> {
        let raw = RawModuleRecord {
            name: self.name,
            contents: self.contents,
            sourcemap: self.sourcemap,
            bytecode: self.bytecode,
            module_info: self.module_info,
            bytecode_origin_path: self.bytecode_origin_path,
            encoding: self.encoding.into(),
            loader: self.loader.into(),
            module_format: self.module_format,
            side: self.side,
        };

        let mut buf = [0; RECORD_SIZE];
        buf[..].pwrite_with(raw, 0, scroll::LE)?;
        Ok(buf)
    }
}

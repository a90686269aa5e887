//! Reading and patching the module graph embedded in standalone executables.
//!
//! A compiled executable carries its bundled modules in a container appended to the native
//! binary. The container ends with a fixed [`TRAILER`], preceded by a fixed-size [`Header`],
//! preceded by a blob that every [`StringPointer`] resolves against:
//!
//! ```text
//! [ native executable ][ blob: byte_count bytes ][ header: 32 bytes ][ trailer: 16 bytes ]
//! ```
//!
//! The module table lives inside the blob and holds one [`ModuleRecord`] per embedded module.
//!
//! # Reading
//!
//! Use [`Container::open`] to decode a file, then iterate [`Container::modules`] or write them
//! all out with [`Container::extract_all`].
//!
//! # Patching
//!
//! [`Container::patch_module`] overwrites a marker in one module's contents without shifting any
//! other byte of the file. The [`install`] module wraps this with a durable backup of the original
//! executable.

#![warn(missing_docs)]

mod container;
mod error;
mod extract;
mod header;
pub mod install;
mod module;
mod patch;
mod trailer;

pub use crate::container::*;
pub use crate::error::*;
pub use crate::extract::*;
pub use crate::header::*;
pub use crate::module::*;
pub use crate::patch::*;
pub use crate::trailer::*;

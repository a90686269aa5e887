//! Common functionality for `bunexe`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ByteView`]: Gives access to binary data in-memory or on the file system.
//!  - Functions to turn virtual module paths embedded in a compiled executable into relative paths
//!    that are safe to create below an output directory.

#![warn(missing_docs)]

mod byteview;
mod path;

pub use crate::byteview::*;
pub use crate::path::*;

//! In-place substitution of module contents.
//!
//! All pointers of a container are relative to the blob. As long as the patched contents keep
//! their exact length, every other pointer stays valid without being rewritten. Patches therefore
//! only ever replace a marker with a payload of the same size or smaller, padding the rest.

use std::ops::Range;

use bytes::Bytes;

use crate::container::Container;
use crate::error::{ContainerError, ContainerErrorKind};

/// The byte used to blank the remainder of a marker.
pub const PADDING_BYTE: u8 = b' ';

/// Returns the position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Replaces the first occurrence of `marker` in `contents`.
///
/// Returns the offset of the marker and the patched copy of `contents`, which has exactly the
/// length of the original. The bytes of the marker not covered by `replacement` are set to
/// [`PADDING_BYTE`].
pub fn patch_contents(
    contents: &[u8],
    marker: &[u8],
    replacement: &[u8],
) -> Result<(usize, Vec<u8>), ContainerError> {
    let offset = if marker.is_empty() {
        None
    } else {
        find(contents, marker)
    };
    let offset = offset.ok_or(ContainerErrorKind::MarkerNotFound)?;

    if replacement.len() > marker.len() {
        return Err(ContainerError::new(
            ContainerErrorKind::ReplacementTooLarge,
            format!(
                "replacement of {} bytes does not fit into marker of {} bytes",
                replacement.len(),
                marker.len()
            ),
        ));
    }

    let mut patched = contents.to_vec();
    let region = &mut patched[offset..offset + marker.len()];
    region.fill(PADDING_BYTE);
    region[..replacement.len()].copy_from_slice(replacement);

    Ok((offset, patched))
}

/// A prepared substitution in the contents of one module.
///
/// Created by [`Container::prepare_patch`]. Apply it to the bytes of the file the container was
/// decoded from with [`apply`](Self::apply).
#[derive(Clone, Debug)]
pub struct ModulePatch {
    module_index: usize,
    marker_offset: usize,
    file_range: Range<u64>,
    original: Bytes,
    patched: Vec<u8>,
}

impl ModulePatch {
    /// Index of the patched module.
    pub fn module_index(&self) -> usize {
        self.module_index
    }

    /// Offset of the marker within the module contents.
    pub fn marker_offset(&self) -> usize {
        self.marker_offset
    }

    /// The absolute file range of the module contents.
    pub fn file_range(&self) -> Range<u64> {
        self.file_range.clone()
    }

    /// The module contents before patching.
    pub fn original_contents(&self) -> &[u8] {
        &self.original
    }

    /// The module contents after patching.
    pub fn patched_contents(&self) -> &[u8] {
        &self.patched
    }

    /// Builds the patched file from the original file bytes.
    ///
    /// The output consists of the bytes preceding the module contents, the patched contents and
    /// the bytes following them. No other byte differs from `original`. The original file must
    /// still hold the unpatched contents at their recorded position.
    pub fn apply(&self, original: &[u8]) -> Result<Vec<u8>, ContainerError> {
        let range = usize::try_from(self.file_range.start)
            .ok()
            .zip(usize::try_from(self.file_range.end).ok())
            .map(|(start, end)| start..end)
            .filter(|range| original.get(range.clone()) == Some(&self.original[..]))
            .ok_or_else(|| {
                ContainerError::new(
                    ContainerErrorKind::CorruptContainer,
                    "file does not hold the decoded module contents",
                )
            })?;

        let mut output = Vec::with_capacity(original.len());
        output.extend_from_slice(&original[..range.start]);
        output.extend_from_slice(&self.patched);
        output.extend_from_slice(&original[range.end..]);

        Ok(output)
    }
}

impl Container {
    /// Prepares replacing `marker` with `replacement` in the contents of a module.
    ///
    /// Fails with [`ContainerErrorKind::MarkerNotFound`] if the contents do not contain the
    /// marker, and with [`ContainerErrorKind::ReplacementTooLarge`] if the replacement is longer
    /// than the marker. Only the first occurrence of the marker is replaced.
    pub fn prepare_patch(
        &self,
        index: usize,
        marker: &[u8],
        replacement: &[u8],
    ) -> Result<ModulePatch, ContainerError> {
        let module = self.module(index)?;
        let original = module.contents.slice(self.blob_bytes())?;
        let (marker_offset, patched) = patch_contents(&original, marker, replacement)?;

        tracing::debug!(
            index,
            marker_offset,
            marker_len = marker.len(),
            replacement_len = replacement.len(),
            "prepared patch"
        );

        Ok(ModulePatch {
            module_index: index,
            marker_offset,
            file_range: self.contents_file_range(&module),
            original,
            patched,
        })
    }

    /// Returns the bytes of the patched file.
    ///
    /// A container only holds its blob, not the native code around it, so `original` must be the
    /// complete file this container was decoded from. See
    /// [`prepare_patch`](Self::prepare_patch) and [`ModulePatch::apply`].
    pub fn patch_module(
        &self,
        original: &[u8],
        index: usize,
        marker: &[u8],
        replacement: &[u8],
    ) -> Result<Vec<u8>, ContainerError> {
        self.prepare_patch(index, marker, replacement)?
            .apply(original)
    }
}

//! Backward scanning for the module graph trailer.

use std::io::{self, Read, Seek, SeekFrom};

use crate::header::TRAILER;

/// Number of bytes read per step while scanning for the trailer.
pub const SCAN_CHUNK_SIZE: usize = 4096;

/// Returns the position of the last occurrence of `needle` in `haystack`.
fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

/// Locates the last occurrence of `magic` by reading backwards from the end.
///
/// The reader is scanned in chunks of `chunk_size` bytes starting at its end. Consecutive chunks
/// overlap by `magic.len() - 1` bytes, so an occurrence straddling a chunk boundary is still
/// found. Only a single chunk is held in memory at any time.
///
/// Returns the offset of the first byte of the match, or `None` if the start of the reader was
/// reached without a match.
pub fn find_magic<R>(reader: &mut R, magic: &[u8], chunk_size: usize) -> io::Result<Option<u64>>
where
    R: Read + Seek,
{
    if magic.is_empty() {
        return Ok(None);
    }

    // each step must advance past the overlap
    let chunk_size = chunk_size.max(magic.len());
    let overlap = (magic.len() - 1) as u64;

    let mut chunk = vec![0; chunk_size];
    let mut end = reader.seek(SeekFrom::End(0))?;

    loop {
        let start = end.saturating_sub(chunk_size as u64);
        let buf = &mut chunk[..(end - start) as usize];
        if buf.len() < magic.len() {
            return Ok(None);
        }

        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(buf)?;

        if let Some(position) = rfind(buf, magic) {
            return Ok(Some(start + position as u64));
        }

        if start == 0 {
            return Ok(None);
        }

        end = start + overlap;
    }
}

/// Locates the module graph [`TRAILER`] in a compiled executable.
pub fn find_trailer<R>(reader: &mut R) -> io::Result<Option<u64>>
where
    R: Read + Seek,
{
    find_magic(reader, TRAILER, SCAN_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use similar_asserts::assert_eq;

    fn buffer_with_trailer(len: usize, position: usize) -> Vec<u8> {
        let mut data = vec![b'x'; len];
        data[position..position + TRAILER.len()].copy_from_slice(TRAILER);
        data
    }

    #[test]
    fn test_trailer_at_end() -> io::Result<()> {
        let data = buffer_with_trailer(10_000, 10_000 - TRAILER.len());
        assert_eq!(find_trailer(&mut Cursor::new(data))?, Some(9_984));
        Ok(())
    }

    #[test]
    fn test_trailer_straddles_chunk() -> io::Result<()> {
        // the first chunk starts at 5904, half of the trailer lies before it
        let len = 10_000;
        let position = len - SCAN_CHUNK_SIZE - TRAILER.len() / 2;
        let data = buffer_with_trailer(len, position);

        assert_eq!(find_trailer(&mut Cursor::new(data))?, Some(position as u64));
        Ok(())
    }

    #[test]
    fn test_every_alignment() -> io::Result<()> {
        let len = 100;
        for position in 0..=len - TRAILER.len() {
            let data = buffer_with_trailer(len, position);
            let found = find_magic(&mut Cursor::new(data), TRAILER, 20)?;
            assert_eq!(found, Some(position as u64), "trailer at {position}");
        }
        Ok(())
    }

    #[test]
    fn test_last_occurrence_wins() -> io::Result<()> {
        let mut data = buffer_with_trailer(9_000, 100);
        data[8_000..8_000 + TRAILER.len()].copy_from_slice(TRAILER);

        assert_eq!(find_trailer(&mut Cursor::new(data))?, Some(8_000));
        Ok(())
    }

    #[test]
    fn test_not_found() -> io::Result<()> {
        let mut data = vec![b'x'; 9_000];
        // an incomplete trailer at the very start
        data[..TRAILER.len() - 1].copy_from_slice(&TRAILER[1..]);

        assert_eq!(find_trailer(&mut Cursor::new(data))?, None);
        assert_eq!(find_trailer(&mut Cursor::new(Vec::new()))?, None);
        assert_eq!(find_trailer(&mut Cursor::new(b"\n---- Bun!".to_vec()))?, None);
        Ok(())
    }

    #[test]
    fn test_tiny_chunks() -> io::Result<()> {
        let data = buffer_with_trailer(1_000, 333);
        assert_eq!(find_magic(&mut Cursor::new(data), TRAILER, 1)?, Some(333));
        Ok(())
    }
}

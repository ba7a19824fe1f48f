//! Fixed-stride overlapping text chunker.
//!
//! Splits document text into [`Chunk`] windows of `chunk_size` characters
//! advancing by `chunk_size - chunk_overlap` each step, so consecutive
//! windows share `chunk_overlap` characters of context. The final window is
//! truncated to the end of the text, never padded, and iteration stops with
//! the first window that reaches the end.
//!
//! Windows are produced lazily; the iterator is `Clone`, so a sequence can
//! be restarted without re-validating parameters.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Split text into overlapping character windows.
///
/// Fails with `InvalidConfiguration` unless `chunk_size > overlap`. Empty
/// text yields an empty sequence. Offsets in the produced chunks are
/// character counts into `text`, independent of UTF-8 byte widths.
pub fn chunk_text<'a>(
    document_id: &'a str,
    source_label: &'a str,
    text: &'a str,
    chunk_size: usize,
    overlap: usize,
) -> Result<ChunkWindows<'a>> {
    if chunk_size <= overlap {
        return Err(Error::InvalidConfiguration(format!(
            "chunk_size ({chunk_size}) must be greater than chunk_overlap ({overlap})"
        )));
    }
    Ok(ChunkWindows {
        document_id,
        source_label,
        text,
        chunk_size,
        stride: chunk_size - overlap,
        next_char: 0,
        next_byte: 0,
        next_index: 0,
        done: false,
    })
}

/// Lazy window iterator returned by [`chunk_text`].
#[derive(Debug, Clone)]
pub struct ChunkWindows<'a> {
    document_id: &'a str,
    source_label: &'a str,
    text: &'a str,
    chunk_size: usize,
    stride: usize,
    next_char: usize,
    next_byte: usize,
    next_index: i64,
    done: bool,
}

impl Iterator for ChunkWindows<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let rest = &self.text[self.next_byte..];
        if rest.is_empty() {
            self.done = true;
            return None;
        }

        // One pass over the window's chars finds both the byte length of the
        // full window and the byte length of one stride. stride <= chunk_size
        // holds by construction, so stride_byte is set whenever the window
        // is full-length.
        let mut pos = 0usize;
        let mut stride_byte = rest.len();
        let mut end_byte = rest.len();
        let mut reached_end = true;
        for (byte_idx, _) in rest.char_indices() {
            if pos == self.stride {
                stride_byte = byte_idx;
            }
            if pos == self.chunk_size {
                end_byte = byte_idx;
                reached_end = false;
                break;
            }
            pos += 1;
        }
        let window_chars = if reached_end { pos } else { self.chunk_size };

        let chunk = Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: self.document_id.to_string(),
            source_label: self.source_label.to_string(),
            chunk_index: self.next_index,
            char_start: self.next_char,
            char_end: self.next_char + window_chars,
            text: rest[..end_byte].to_string(),
        };

        if reached_end {
            self.done = true;
        } else {
            self.next_byte += stride_byte;
            self.next_char += self.stride;
        }
        self.next_index += 1;
        Some(chunk)
    }
}

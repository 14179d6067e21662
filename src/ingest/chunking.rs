//! Deterministic text windowing.
//!
//! Splits page text into overlapping character windows. The same input and
//! configuration always produce the same boundaries, so re-ingesting a
//! document yields identical fragments.

/// Split `text` into windows of `size` characters where consecutive windows
/// share `overlap` characters.
///
/// The window step is `size - overlap`; the caller guarantees
/// `overlap < size` (enforced by config validation). Concatenating the first
/// chunk with every later chunk minus its `overlap`-character prefix
/// reconstructs the input exactly.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < size, "chunk overlap must be less than chunk size");

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

//! Accent-tolerant, case-insensitive view of an utterance
//!
//! Patterns run against the folded text; captured spans are mapped back
//! onto the original so values keep their spelling ("João", "R$ 50.000").

use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone)]
pub struct NormalizedText<'a> {
    original: &'a str,
    folded: String,
    /// Original byte offset for every byte offset of `folded` (plus the end).
    origin: Vec<usize>,
}

impl<'a> NormalizedText<'a> {
    pub fn new(original: &'a str) -> Self {
        let mut folded = String::with_capacity(original.len());
        let mut origin = Vec::with_capacity(original.len() + 1);

        for (offset, c) in original.char_indices() {
            let f = fold_char(c);
            for _ in 0..f.len_utf8() {
                origin.push(offset);
            }
            folded.push(f);
        }
        origin.push(original.len());

        Self {
            original,
            folded,
            origin,
        }
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn original(&self) -> &'a str {
        self.original
    }

    /// Slice of the original text covering `start..end` of the folded text.
    pub fn original_span(&self, start: usize, end: usize) -> &'a str {
        let from = self.origin[start.min(self.folded.len())];
        let to = self.origin[end.min(self.folded.len())];
        &self.original[from..to]
    }
}

/// Lowercase and strip combining marks, one char in, one char out.
fn fold_char(c: char) -> char {
    let lower = c.to_lowercase().next().unwrap_or(c);
    std::iter::once(lower).nfd().next().unwrap_or(lower)
}

//! Splits raw text into overlapping, token-aligned chunks for embedding.
//!
//! Tokens are tiny runs of at most four characters. A whitespace or punctuation
//! character always ends the token it belongs to, so concatenating the tokens
//! gives back the input unchanged. Windows of `chunk_size` tokens slide forward
//! by `chunk_size - chunk_overlap` and are nudged back onto word boundaries.

use serde::{Deserialize, Serialize};

/// Default window width, in tokens.
pub const DEFAULT_CHUNK_SIZE: usize = 128;
/// Default number of tokens shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 16;

const MAX_TOKEN_CHARS: usize = 4;

/// Window parameters for [`chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation()
}

fn ends_at_boundary(token: &str) -> bool {
    token.chars().next_back().map_or(false, is_boundary)
}

/// Splits `text` into tokens of up to four characters. A boundary character is
/// kept as the last character of the token it terminates.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (i, c) in text.char_indices() {
        chars += 1;
        if chars >= MAX_TOKEN_CHARS || is_boundary(c) {
            let end = i + c.len_utf8();
            tokens.push(&text[start..end]);
            start = end;
            chars = 0;
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Lazily chunk `text` into overlapping windows of `chunk_size` tokens.
///
/// Empty input yields no chunks.
pub fn chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Chunks<'_>, ChunkError> {
    let options = ChunkingOptions {
        chunk_size,
        chunk_overlap,
    };
    options.validate()?;
    let tokens = tokenize(text);
    let next = if tokens.is_empty() { None } else { Some(0) };
    Ok(Chunks {
        tokens,
        size: chunk_size,
        step: chunk_size - chunk_overlap,
        next,
    })
}

/// Same as [`chunk`], taking the window parameters from `options`.
pub fn chunk_with(text: &str, options: ChunkingOptions) -> Result<Chunks<'_>, ChunkError> {
    chunk(text, options.chunk_size, options.chunk_overlap)
}

/// Iterator over the chunks of one text. Created by [`chunk`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    tokens: Vec<&'a str>,
    size: usize,
    step: usize,
    /// Raw start of the next window; `None` once the last token was covered.
    next: Option<usize>,
}

impl<'a> Chunks<'a> {
    /// Moves the window start back to just after a boundary token, looking at
    /// most one window width back. Start of text counts as a boundary.
    fn align_start(&self, start: usize) -> usize {
        let floor = start.saturating_sub(self.size);
        let mut s = start;
        while s > floor && !ends_at_boundary(self.tokens[s - 1]) {
            s -= 1;
        }
        if s > 0 && !ends_at_boundary(self.tokens[s - 1]) {
            return start;
        }
        s
    }

    /// Pulls the window end back to the last boundary token, never past `start`.
    /// End of text counts as a boundary.
    fn align_end(&self, start: usize, end: usize) -> usize {
        if end == self.tokens.len() {
            return end;
        }
        let mut e = end;
        while e > start + 1 && !ends_at_boundary(self.tokens[e - 1]) {
            e -= 1;
        }
        if ends_at_boundary(self.tokens[e - 1]) {
            e
        } else {
            end
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let raw_start = self.next?;
        let len = self.tokens.len();
        let raw_end = (raw_start + self.size).min(len);
        self.next = if raw_end >= len {
            None
        } else {
            Some(raw_start + self.step)
        };
        let start = self.align_start(raw_start);
        let end = self.align_end(start, raw_end);
        Some(self.tokens[start..end].concat())
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})")]
    OverlapTooLarge {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}

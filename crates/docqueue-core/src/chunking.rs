//! Sliding-window text chunking with page tagging.
//!
//! Text is split into windows of `chunk_size` characters that overlap by
//! `overlap` characters. A window that does not reach the end of the text is
//! shortened to the last sentence or line break in its second half, so chunks
//! tend to end on natural boundaries. Each chunk is tagged with every page
//! whose span it overlaps.
//!
//! Offsets are character offsets, matching the page spans produced by
//! extractors. Chunking is deterministic for identical input.
//!
//! # Example
//!
//! ```rust
//! use docqueue_core::chunking::{Chunker, ChunkerConfig, SlidingWindowChunker};
//! use docqueue_core::ExtractedText;
//!
//! let chunker = SlidingWindowChunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk(&ExtractedText::single_page("One sentence. Another one."));
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page_numbers, vec![1]);
//! ```

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{ExtractedText, PageSpan, TextChunk};

/// Preferred break points, tried in order.
const BREAK_DELIMITERS: [&str; 5] = [". ", "! ", "? ", "\n\n", "\n"];

/// Configuration for the sliding-window chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// Load from `CHUNK_SIZE` and `CHUNK_OVERLAP`, falling back to defaults.
    pub fn from_env() -> Self {
        let chunk_size = std::env::var("CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CHUNK_SIZE);
        let overlap = std::env::var("CHUNK_OVERLAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CHUNK_OVERLAP);
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    /// Reject configurations that cannot make forward progress.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split extracted text into chunks.
    fn chunk(&self, text: &ExtractedText) -> Vec<TextChunk>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Fixed-size windows with overlap and boundary-aware breaks.
#[derive(Debug, Clone)]
pub struct SlidingWindowChunker {
    config: ChunkerConfig,
}

impl SlidingWindowChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// End of the window starting at `start`, in character offsets.
    fn window_end(&self, chars: &[char], start: usize) -> usize {
        let end = (start + self.config.chunk_size).min(chars.len());
        if end == chars.len() {
            return end;
        }
        let floor = start + self.config.chunk_size / 2;
        for delim in BREAK_DELIMITERS {
            if let Some(pos) = rfind(chars, delim, floor, end) {
                return pos + delim.chars().count();
            }
        }
        end
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &ExtractedText) -> Vec<TextChunk> {
        if text.is_blank() {
            return vec![];
        }

        let chars: Vec<char> = text.text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = self.window_end(&chars, start);
            let body: String = chars[start..end].iter().collect();
            let trimmed = body.trim();

            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    index: chunks.len() as i32,
                    text: trimmed.to_string(),
                    start_offset: start,
                    end_offset: end,
                    page_numbers: pages_overlapping(&text.page_spans, start, end),
                });
            }

            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.config.overlap).max(start + 1);
        }

        chunks
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Start of the last occurrence of `needle` fully inside `chars[from..to]`.
fn rfind(chars: &[char], needle: &str, from: usize, to: usize) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if to < from + needle.len() {
        return None;
    }
    (from..=to - needle.len())
        .rev()
        .find(|&i| chars[i..i + needle.len()] == needle[..])
}

fn pages_overlapping(spans: &[PageSpan], start: usize, end: usize) -> Vec<i32> {
    let mut pages: Vec<i32> = spans
        .iter()
        .filter(|span| !(end <= span.start_offset || start >= span.end_offset))
        .map(|span| span.page_num)
        .collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> SlidingWindowChunker {
        SlidingWindowChunker::new(ChunkerConfig::default().with_chunk_size(size).with_overlap(overlap))
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let c = chunker(100, 20);
        assert!(c.chunk(&ExtractedText::default()).is_empty());
        assert!(c.chunk(&ExtractedText::single_page("   \n\n  ")).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker(100, 20);
        let chunks = c.chunk(&ExtractedText::single_page("Hello world."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello world.");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 12);
    }

    #[test]
    fn test_breaks_at_sentence_boundary() {
        let c = chunker(30, 5);
        let text = "First sentence here. Second sentence follows and runs on.";
        let chunks = c.chunk(&ExtractedText::single_page(text));
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].text, "First sentence here.");
        assert_eq!(chunks[0].end_offset, 21);
    }

    #[test]
    fn test_windows_overlap() {
        let c = chunker(10, 3);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = c.chunk(&ExtractedText::single_page(text));
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 10);
        assert_eq!(chunks[1].start_offset, 7);
        assert_eq!(chunks.last().unwrap().end_offset, 26);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
        }
    }

    #[test]
    fn test_indices_are_sequential() {
        let c = chunker(10, 2);
        let chunks = c.chunk(&ExtractedText::single_page("x".repeat(55)));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i32);
        }
    }

    #[test]
    fn test_page_tagging_by_offset_overlap() {
        let c = chunker(10, 0);
        let text = ExtractedText {
            text: "aaaaaaaaaabbbbbbbbbb".to_string(),
            page_spans: vec![
                PageSpan {
                    page_num: 1,
                    start_offset: 0,
                    end_offset: 5,
                },
                PageSpan {
                    page_num: 2,
                    start_offset: 5,
                    end_offset: 15,
                },
                PageSpan {
                    page_num: 3,
                    start_offset: 15,
                    end_offset: 20,
                },
            ],
        };
        let chunks = c.chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_numbers, vec![1, 2]);
        assert_eq!(chunks[0].primary_page(), Some(1));
        assert_eq!(chunks[1].page_numbers, vec![2, 3]);
    }

    #[test]
    fn test_multibyte_text_uses_char_offsets() {
        let c = chunker(4, 1);
        let chunks = c.chunk(&ExtractedText::single_page("ééééééé"));
        assert_eq!(chunks[0].text, "éééé");
        assert_eq!(chunks[0].end_offset, 4);
    }

    #[test]
    fn test_deterministic() {
        let c = chunker(50, 10);
        let text = ExtractedText::single_page("Lorem ipsum dolor sit amet. ".repeat(20));
        assert_eq!(c.chunk(&text), c.chunk(&text));
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::default().validate().is_ok());
        assert!(ChunkerConfig::default().with_overlap(1000).validate().is_err());
        assert!(ChunkerConfig::default().with_chunk_size(0).validate().is_err());
    }
}

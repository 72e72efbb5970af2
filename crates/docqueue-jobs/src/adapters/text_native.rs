//! Plain text extraction adapter.

use async_trait::async_trait;

use docqueue_core::{Error, ExtractedText, PageSpan, Result, TextExtractor};

/// File extensions handled as plain text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv", "json", "log"];

/// Adapter for extracting content from plain text files.
///
/// Reads bytes as UTF-8 (with lossy conversion for invalid sequences) and
/// strips a leading byte order mark. Form feeds separate pages.
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn supports(filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, data: &[u8], filename: &str) -> Result<ExtractedText> {
        if !Self::supports(filename) {
            return Err(Error::UnsupportedFormat(filename.to_string()));
        }

        let text = String::from_utf8_lossy(data);
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string();
        let page_spans = page_spans(&text);

        Ok(ExtractedText { text, page_spans })
    }
}

/// Character ranges of the form-feed separated pages in `text`.
fn page_spans(text: &str) -> Vec<PageSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut page_num = 1;
    for (pos, ch) in text.chars().enumerate() {
        if ch == '\u{000C}' {
            spans.push(PageSpan {
                page_num,
                start_offset: start,
                end_offset: pos,
            });
            page_num += 1;
            start = pos + 1;
        }
    }
    spans.push(PageSpan {
        page_num,
        start_offset: start,
        end_offset: text.chars().count(),
    });
    spans
}

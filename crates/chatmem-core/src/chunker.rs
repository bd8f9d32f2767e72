//! ============================================================================
//! Chat Chunker - Sliding windows over ordered message histories
//! ============================================================================
//! Splits a history into overlapping windows of `window_size` messages,
//! advancing by `stride`, and renders each window to a single text blob.
//! ============================================================================

use chrono::{DateTime, Utc};

use crate::types::{Chunk, ChunkMetadata, FormatStyle, MemoryError, Message};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Windowing parameters. Holds no other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatChunker {
    window_size: usize,
    stride: usize,
}

impl ChatChunker {
    /// Create a chunker; both parameters must be at least 1
    pub fn new(window_size: usize, stride: usize) -> Result<Self, MemoryError> {
        if window_size == 0 {
            return Err(MemoryError::InvalidChunking(
                "window_size must be at least 1".to_string(),
            ));
        }
        if stride == 0 {
            return Err(MemoryError::InvalidChunking(
                "stride must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            window_size,
            stride,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Half-open `[start, end)` message ranges, in order.
    ///
    /// A history no longer than the window yields one range covering all of
    /// it. Otherwise trailing windows that would run past the end are dropped.
    pub fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        if len == 0 {
            return Vec::new();
        }
        if self.window_size >= len {
            return vec![(0, len)];
        }

        (0..=len - self.window_size)
            .step_by(self.stride)
            .map(|start| (start, start + self.window_size))
            .collect()
    }

    /// Chunk a history into rendered windows
    pub fn chunk_history(
        &self,
        history: &[Message],
        session_id: &str,
        format_style: FormatStyle,
        include_metadata: bool,
    ) -> Vec<Chunk> {
        let windows = self.windows(history.len());
        let total_chunks = windows.len();
        let created_at = Utc::now().to_rfc3339();

        windows
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let text = render(&history[start..end], format_style);
                let metadata = include_metadata.then(|| ChunkMetadata {
                    session_id: session_id.to_string(),
                    chunk_index,
                    total_chunks,
                    window_start: start,
                    window_end: end - 1,
                    message_count: end - start,
                    format_style,
                    created_at: created_at.clone(),
                });
                Chunk { text, metadata }
            })
            .collect()
    }
}

/// Render a window of messages. Output depends only on the input.
pub fn render(messages: &[Message], style: FormatStyle) -> String {
    match style {
        FormatStyle::Simple => messages
            .iter()
            .map(|m| format!("{}: {}", m.role.display_name(), m.content.trim()))
            .collect::<Vec<_>>()
            .join("\n"),
        FormatStyle::Detailed => messages
            .iter()
            .map(|m| {
                let stamp = m
                    .timestamp
                    .map(format_timestamp)
                    .unwrap_or_else(|| "no timestamp".to_string());
                format!("[{}] {}: {}", stamp, m.role.display_name(), m.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        FormatStyle::Markdown => messages
            .iter()
            .map(|m| {
                let header = match m.timestamp {
                    Some(ts) => format!("### {} ({})", m.role.display_name(), format_timestamp(ts)),
                    None => format!("### {}", m.role.display_name()),
                };
                format!("{}\n\n{}", header, m.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {}", i))
                } else {
                    Message::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    fn chunker(window_size: usize, stride: usize) -> ChatChunker {
        ChatChunker::new(window_size, stride).unwrap()
    }

    #[test]
    fn test_rejects_zero_parameters() {
        assert!(matches!(
            ChatChunker::new(0, 1),
            Err(MemoryError::InvalidChunking(_))
        ));
        assert!(matches!(
            ChatChunker::new(3, 0),
            Err(MemoryError::InvalidChunking(_))
        ));
    }

    #[test]
    fn test_empty_history_yields_nothing() {
        let chunks = chunker(3, 1).chunk_history(&[], "s1", FormatStyle::Simple, true);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_five_messages_window_three_stride_one() {
        let chunks = chunker(3, 1).chunk_history(&history(5), "s1", FormatStyle::Simple, true);
        assert_eq!(chunks.len(), 3);

        let spans: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| {
                let meta = c.metadata.as_ref().unwrap();
                (meta.window_start, meta.window_end)
            })
            .collect();
        assert_eq!(spans, vec![(0, 2), (1, 3), (2, 4)]);

        assert_eq!(
            chunks[1].text,
            "Assistant: answer 1\nUser: question 2\nAssistant: answer 3"
        );
    }

    #[test]
    fn test_chunk_count_formula() {
        for len in 1..=12 {
            for window in 1..=len {
                for stride in 1..=6 {
                    let expected = (len - window) / stride + 1;
                    assert_eq!(
                        chunker(window, stride).windows(len).len(),
                        expected,
                        "len={} window={} stride={}",
                        len,
                        window,
                        stride
                    );
                }
            }
        }
    }

    #[test]
    fn test_oversized_window_covers_full_history() {
        let msgs = history(4);
        let chunks = chunker(msgs.len() + 5, 1).chunk_history(&msgs, "s1", FormatStyle::Simple, true);
        assert_eq!(chunks.len(), 1);

        let meta = chunks[0].metadata.as_ref().unwrap();
        assert_eq!((meta.window_start, meta.window_end), (0, 3));
        assert_eq!(meta.message_count, 4);
        assert_eq!(meta.total_chunks, 1);
        assert_eq!(chunks[0].text.lines().count(), 4);
    }

    #[test]
    fn test_stride_larger_than_window_skips_messages() {
        assert_eq!(chunker(2, 3).windows(8), vec![(0, 2), (3, 5), (6, 8)]);
    }

    #[test]
    fn test_trailing_partial_window_dropped() {
        assert_eq!(chunker(3, 2).windows(6), vec![(0, 3), (2, 5)]);
    }

    #[test]
    fn test_metadata_optional() {
        let chunks = chunker(2, 1).chunk_history(&history(3), "s1", FormatStyle::Simple, false);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.metadata.is_none()));
    }

    #[test]
    fn test_metadata_indices_in_order() {
        let chunks = chunker(2, 1).chunk_history(&history(6), "abc", FormatStyle::Markdown, true);
        for (i, chunk) in chunks.iter().enumerate() {
            let meta = chunk.metadata.as_ref().unwrap();
            assert_eq!(meta.chunk_index, i);
            assert_eq!(meta.total_chunks, chunks.len());
            assert_eq!(meta.session_id, "abc");
            assert_eq!(meta.format_style, FormatStyle::Markdown);
        }
    }

    #[test]
    fn test_detailed_and_markdown_rendering() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let msgs = vec![
            Message::user("  what's the capital of France? ").with_timestamp(ts),
            Message::assistant("It's Paris."),
        ];

        assert_eq!(
            render(&msgs, FormatStyle::Detailed),
            "[2024-03-01 09:30:00] User: what's the capital of France?\n[no timestamp] Assistant: It's Paris."
        );
        assert_eq!(
            render(&msgs, FormatStyle::Markdown),
            "### User (2024-03-01 09:30:00)\n\nwhat's the capital of France?\n\n### Assistant\n\nIt's Paris."
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let msgs = history(5);
        for style in [FormatStyle::Simple, FormatStyle::Detailed, FormatStyle::Markdown] {
            assert_eq!(render(&msgs, style), render(&msgs, style));
        }
    }
}

//! Size-budget text chunker with overlap.
//!
//! Splits extracted document text into ordered chunks bounded by
//! `chunk_size` characters, carrying roughly `chunk_overlap` characters of
//! trailing context into the next chunk at word boundaries. Markdown is
//! split before `#` headers (sections under the budget stay whole); JSON
//! arrays chunk per element and JSON objects per top-level entry.
//!
//! Whitespace inside a chunk is normalized to single spaces (markdown keeps
//! its line structure within a section); concatenating chunks with overlaps
//! removed reconstructs the source modulo that normalization.
//!
//! In `contextual` mode every chunk also carries `contextual_text`: the
//! chunk prefixed with a short document- and section-level summary line.
//! The embedder consumes `contextual_text`; the stored record keeps both.

use crate::config::{ChunkingConfig, ChunkingStrategy};

/// One ordered chunk of a document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based position within the owning file.
    pub index: i64,
    /// The chunk text as stored and returned by search.
    pub content: String,
    /// Context-prefixed text to embed instead of `content`, when contextual
    /// chunking is enabled.
    pub contextual_text: Option<String>,
}

/// Split `text` into chunks according to the file type and configuration.
/// Returns an empty vector for whitespace-only input.
pub fn chunk_document(text: &str, file_type: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces: Vec<Piece> = match file_type {
        "md" => split_markdown(text, config.chunk_size, config.chunk_overlap),
        "json" => split_json(text, config.chunk_size, config.chunk_overlap),
        _ => split_plain(text, config.chunk_size, config.chunk_overlap)
            .into_iter()
            .map(|content| Piece {
                content,
                section: None,
            })
            .collect(),
    };

    let doc_context = match config.strategy {
        ChunkingStrategy::Contextual => Some(document_summary(text, file_type)),
        ChunkingStrategy::Normal => None,
    };

    pieces
        .into_iter()
        .filter(|p| !p.content.trim().is_empty())
        .enumerate()
        .map(|(i, piece)| {
            let contextual_text = doc_context.as_ref().map(|doc| {
                let mut context = doc.clone();
                if let Some(ref section) = piece.section {
                    context.push_str(" / ");
                    context.push_str(section);
                }
                format!("{}\n\n{}", context, piece.content)
            });
            Chunk {
                index: i as i64,
                content: piece.content,
                contextual_text,
            }
        })
        .collect()
}

struct Piece {
    content: String,
    section: Option<String>,
}

// ── Plain text ──────────────────────────────────────────────────────────

/// Greedy word packer: fill each chunk up to `chunk_size` characters, then
/// start the next chunk with the trailing words of the previous one up to
/// `chunk_overlap` characters.
fn split_plain(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let words = explode_words(text, chunk_size);
    if words.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in &words {
        let word = word.as_str();
        let word_len = word.chars().count();
        let joined = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if joined > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));

            // Carry trailing words as overlap for the next chunk, dropping
            // the carry entirely if it would not leave room for the word.
            let mut carry: Vec<&str> = Vec::new();
            let mut carry_len = 0usize;
            for prev in current.iter().rev() {
                let prev_len = prev.chars().count();
                let with_prev = if carry.is_empty() {
                    prev_len
                } else {
                    carry_len + 1 + prev_len
                };
                if with_prev > chunk_overlap || with_prev + 1 + word_len > chunk_size {
                    break;
                }
                carry.push(prev);
                carry_len = with_prev;
            }
            carry.reverse();
            current = carry;
            current_len = carry_len;

            let restart = if current.is_empty() {
                word_len
            } else {
                current_len + 1 + word_len
            };
            current.push(word);
            current_len = restart;
        } else {
            current.push(word);
            current_len = joined;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Whitespace-split words, hard-splitting any single word longer than the
/// chunk budget.
fn explode_words(text: &str, chunk_size: usize) -> Vec<String> {
    let mut words = Vec::new();
    for word in text.split_whitespace() {
        if word.chars().count() <= chunk_size {
            words.push(word.to_string());
        } else {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(chunk_size.max(1)) {
                words.push(piece.iter().collect());
            }
        }
    }
    words
}

// ── Markdown ────────────────────────────────────────────────────────────

/// Split before `#` headers. A section within the budget stays a single
/// chunk; oversized sections fall back to the plain splitter.
fn split_markdown(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Piece> {
    let mut sections: Vec<(Option<String>, String)> = Vec::new();
    let mut current = String::new();
    let mut current_heading: Option<String> = None;

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            if !current.trim().is_empty() {
                sections.push((current_heading.clone(), current.clone()));
            }
            current.clear();
            current_heading = Some(line.trim().trim_start_matches('#').trim().to_string());
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        sections.push((current_heading, current));
    }

    let mut pieces = Vec::new();
    for (heading, body) in sections {
        let body = body.trim();
        if body.chars().count() <= chunk_size {
            pieces.push(Piece {
                content: body.to_string(),
                section: heading.clone(),
            });
        } else {
            for part in split_plain(body, chunk_size, chunk_overlap) {
                pieces.push(Piece {
                    content: part,
                    section: heading.clone(),
                });
            }
        }
    }
    pieces
}

// ── JSON ────────────────────────────────────────────────────────────────

/// Array elements (or top-level object entries) are the candidate chunks.
/// Invalid JSON falls back to plain splitting.
fn split_json(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Piece> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return split_plain(text, chunk_size, chunk_overlap)
                .into_iter()
                .map(|content| Piece {
                    content,
                    section: None,
                })
                .collect()
        }
    };

    let candidates: Vec<String> = match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| serde_json::to_string(item).unwrap_or_default())
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(key, val)| {
                format!(
                    "{}: {}",
                    key,
                    serde_json::to_string(val).unwrap_or_default()
                )
            })
            .collect(),
        other => vec![serde_json::to_string(&other).unwrap_or_default()],
    };

    let mut pieces = Vec::new();
    for candidate in candidates {
        if candidate.chars().count() <= chunk_size {
            pieces.push(Piece {
                content: candidate,
                section: None,
            });
        } else {
            for part in split_plain(&candidate, chunk_size, chunk_overlap) {
                pieces.push(Piece {
                    content: part,
                    section: None,
                });
            }
        }
    }
    pieces
}

// ── Contextual summaries ────────────────────────────────────────────────

/// One-line document summary: the first markdown heading when present,
/// otherwise the first sentence, capped at 160 characters.
fn document_summary(text: &str, file_type: &str) -> String {
    if file_type == "md" {
        if let Some(heading) = text
            .lines()
            .find(|l| l.trim_start().starts_with('#'))
            .map(|l| l.trim().trim_start_matches('#').trim().to_string())
        {
            if !heading.is_empty() {
                return cap_chars(&heading, 160);
            }
        }
    }

    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentence_end = flat
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8());
    let summary = match sentence_end {
        Some(end) => &flat[..end],
        None => flat.as_str(),
    };
    cap_chars(summary, 160)
}

fn cap_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            strategy: ChunkingStrategy::Normal,
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_document("hello world", "txt", &config(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "hello world");
        assert!(chunks[0].contextual_text.is_none());
    }

    #[test]
    fn empty_and_whitespace_input_produce_no_chunks() {
        assert!(chunk_document("", "txt", &config(100, 10)).is_empty());
        assert!(chunk_document("   \n\t ", "txt", &config(100, 10)).is_empty());
    }

    #[test]
    fn chunks_respect_size_budget_and_are_contiguous() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_document(&text, "txt", &config(50, 10));
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i64);
            assert!(chunk.content.chars().count() <= 50);
            assert!(!chunk.content.trim().is_empty());
        }
    }

    #[test]
    fn zero_overlap_reconstructs_word_sequence() {
        let text = (0..120)
            .map(|i| format!("token{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_document(&text, "txt", &config(40, 0));
        let rebuilt: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.content.split_whitespace())
            .collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn adjacent_full_chunks_share_overlap_words() {
        let text = (0..200)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_document(&text, "txt", &config(50, 12));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev_words: Vec<&str> = pair[0].content.split_whitespace().collect();
            let next_words: Vec<&str> = pair[1].content.split_whitespace().collect();
            // The next chunk opens with a non-empty suffix of the previous
            // chunk (word-boundary approximation of the overlap).
            let shares_overlap = (1..=next_words.len().min(prev_words.len()))
                .any(|k| prev_words.ends_with(&next_words[..k]));
            assert!(
                shares_overlap,
                "expected overlap between {:?} and {:?}",
                pair[0].content,
                pair[1].content
            );
        }
    }

    #[test]
    fn overlap_removal_reconstructs_source() {
        let text = (0..150)
            .map(|i| format!("item{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_document(&text, "txt", &config(60, 15));

        // Drop each chunk's overlap prefix: skip words already seen at the
        // tail of the previous chunk.
        let mut rebuilt: Vec<String> = Vec::new();
        for chunk in &chunks {
            let words: Vec<&str> = chunk.content.split_whitespace().collect();
            let mut skip = 0;
            'outer: for candidate in (0..=words.len().min(rebuilt.len())).rev() {
                if candidate == 0 {
                    break;
                }
                let tail = &rebuilt[rebuilt.len() - candidate..];
                for (a, b) in tail.iter().zip(words.iter()) {
                    if a != b {
                        continue 'outer;
                    }
                }
                skip = candidate;
                break;
            }
            rebuilt.extend(words[skip..].iter().map(|w| w.to_string()));
        }

        let original: Vec<String> = text.split_whitespace().map(|w| w.to_string()).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn long_word_is_hard_split() {
        let text = "x".repeat(130);
        let chunks = chunk_document(&text, "txt", &config(50, 5));
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 50);
        }
    }

    #[test]
    fn markdown_splits_before_headers() {
        let text = "# Intro\nshort intro\n\n# Usage\nhow to use it\n\n# FAQ\nnothing yet";
        let chunks = chunk_document(text, "md", &config(500, 50));
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("# Intro"));
        assert!(chunks[1].content.starts_with("# Usage"));
        assert!(chunks[2].content.starts_with("# FAQ"));
    }

    #[test]
    fn markdown_section_under_budget_stays_whole() {
        let body = "line one\nline two\nline three";
        let text = format!("# Section\n{}", body);
        let chunks = chunk_document(&text, "md", &config(500, 50));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("line three"));
    }

    #[test]
    fn json_array_elements_are_candidate_chunks() {
        let text = r#"[{"a": 1}, {"b": 2}, {"c": 3}]"#;
        let chunks = chunk_document(text, "json", &config(500, 50));
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.contains("\"a\""));
        assert!(chunks[2].content.contains("\"c\""));
    }

    #[test]
    fn json_object_entries_are_candidate_chunks() {
        let text = r#"{"alpha": 1, "beta": [1, 2, 3]}"#;
        let chunks = chunk_document(text, "json", &config(500, 50));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().any(|c| c.content.starts_with("alpha:")));
        assert!(chunks.iter().any(|c| c.content.starts_with("beta:")));
    }

    #[test]
    fn contextual_mode_prefixes_summary_and_keeps_content() {
        let config = ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 50,
            strategy: ChunkingStrategy::Contextual,
        };
        let text = "# Guide\nInstall the tool first.\n\n# Details\nThen configure it.";
        let chunks = chunk_document(text, "md", &config);
        assert_eq!(chunks.len(), 2);

        let contextual = chunks[1].contextual_text.as_ref().unwrap();
        assert!(contextual.contains("Guide"));
        assert!(contextual.contains("Details"));
        assert!(contextual.ends_with(&chunks[1].content));
        // Plain content carries no context prefix.
        assert!(chunks[1].content.starts_with("# Details"));
    }

    #[test]
    fn deterministic() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let a = chunk_document(text, "txt", &config(20, 5));
        let b = chunk_document(text, "txt", &config(20, 5));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.index, y.index);
        }
    }
}

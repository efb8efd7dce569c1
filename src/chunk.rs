//! Deterministic bounded chunker.
//!
//! Splits artifact text into chunks no larger than `max_chars`, breaking on
//! line boundaries and carrying a configurable overlap suffix from one chunk
//! into the next. Identical input always yields the identical chunk sequence
//! (ids included) — required for the tracker's hash-based dedup and so that
//! re-upserts replace stored points instead of duplicating them.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkMetadata};

/// Deterministic chunk id: UUID built from the leading bytes of
/// SHA-256(artifact_id, index, text).
pub fn chunk_id(artifact_id: &str, index: i64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Split artifact text into metadata-tagged chunks.
///
/// Whitespace-only input yields no chunks. Each chunk inherits the base
/// metadata; severity is re-detected per chunk from its own text so a log
/// file mixing levels tags each slice correctly.
pub fn chunk_artifact(
    artifact_id: &str,
    text: &str,
    base: &ChunkMetadata,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let mut texts: Vec<String> = Vec::new();
    let mut buf = String::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        for piece in split_long_line(line, max_chars) {
            if piece.is_empty() {
                continue;
            }
            let sep = usize::from(!buf.is_empty());
            if !buf.is_empty() && buf.len() + sep + piece.len() > max_chars {
                let tail = overlap_tail(&buf, overlap_chars);
                texts.push(std::mem::take(&mut buf));
                // Seed the next chunk with the overlap unless that alone
                // would blow the budget.
                if !tail.is_empty() && tail.len() + 1 + piece.len() <= max_chars {
                    buf = tail;
                }
            }
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(piece);
        }
    }

    if !buf.is_empty() {
        texts.push(buf);
    }

    texts
        .into_iter()
        .enumerate()
        .map(|(i, chunk_text)| {
            let index = i as i64;
            let mut metadata = base.clone();
            if let Some(severity) = detect_severity(&chunk_text) {
                metadata.severity = Some(severity.to_string());
            }
            Chunk {
                id: chunk_id(artifact_id, index, &chunk_text),
                artifact_id: artifact_id.to_string(),
                chunk_index: index,
                text: chunk_text,
                metadata,
            }
        })
        .collect()
}

/// Highest severity token present in the text, if any.
pub fn detect_severity(text: &str) -> Option<&'static str> {
    for level in ["ERROR", "WARN", "INFO", "DEBUG"] {
        if text.contains(level) {
            return Some(level);
        }
    }
    None
}

/// Break a single overlong line at space boundaries where possible,
/// falling back to hard char-boundary splits.
fn split_long_line(line: &str, max_chars: usize) -> Vec<&str> {
    if line.len() <= max_chars {
        return vec![line];
    }

    let mut pieces = Vec::new();
    let mut remaining = line;
    while remaining.len() > max_chars {
        let hard = floor_char_boundary(remaining, max_chars);
        let mut split_at = remaining[..hard]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(hard);
        // A budget narrower than the next char still has to make progress:
        // take that one char even though it overshoots.
        if split_at == 0 {
            split_at = ceil_char_boundary(remaining, 1);
        }
        pieces.push(remaining[..split_at].trim_end());
        remaining = &remaining[split_at..];
    }
    if !remaining.is_empty() {
        pieces.push(remaining);
    }
    pieces
}

/// Last `overlap_chars` of the chunk, aligned to a char boundary and
/// preferring to start at a line boundary inside the window.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || text.is_empty() {
        return String::new();
    }
    if text.len() <= overlap_chars {
        return text.to_string();
    }

    let start = ceil_char_boundary(text, text.len() - overlap_chars);
    let window = &text[start..];
    match window.find('\n') {
        Some(pos) if pos + 1 < window.len() => window[pos + 1..].to_string(),
        _ => window.to_string(),
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_meta() -> ChunkMetadata {
        ChunkMetadata {
            source_path: "logs/app.log".into(),
            artifact_id: "a1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_artifact("a1", "connection refused at 10:02", &base_meta(), 2000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "connection refused at 10:02");
    }

    #[test]
    fn test_whitespace_only_yields_no_chunks() {
        assert!(chunk_artifact("a1", "", &base_meta(), 2000, 200).is_empty());
        assert!(chunk_artifact("a1", "  \n\n  ", &base_meta(), 2000, 200).is_empty());
    }

    #[test]
    fn test_chunks_respect_max_chars() {
        let text = (0..40)
            .map(|i| format!("line number {} with some log content", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_artifact("a1", &text, &base_meta(), 120, 30);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 120, "chunk over budget: {}", c.text.len());
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        let text = (0..10)
            .map(|i| format!("entry-{:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_artifact("a1", &text, &base_meta(), 30, 10);
        assert!(chunks.len() > 1);
        // Each later chunk starts with a line that closed the previous one.
        for pair in chunks.windows(2) {
            let first_line = pair[1].text.lines().next().unwrap();
            assert!(
                pair[0].text.contains(first_line),
                "no overlap between '{}' and '{}'",
                pair[0].text,
                pair[1].text
            );
        }
    }

    #[test]
    fn test_deterministic_ids_and_order() {
        let text = "alpha\nbeta\ngamma\ndelta\nepsilon\nzeta";
        let a = chunk_artifact("a1", text, &base_meta(), 12, 4);
        let b = chunk_artifact("a1", text, &base_meta(), 12, 4);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
        }
        // Different artifact, same text: different ids
        let c = chunk_artifact("a2", text, &base_meta(), 12, 4);
        assert_ne!(a[0].id, c[0].id);
    }

    #[test]
    fn test_long_line_hard_split() {
        let text = "x".repeat(5000);
        let chunks = chunk_artifact("a1", &text, &base_meta(), 2000, 200);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.text.len() <= 2000);
        }
    }

    #[test]
    fn test_multibyte_line_with_tiny_budget_terminates() {
        // Each char here is 3 bytes, wider than the whole budget.
        let chunks = chunk_artifact("a1", "日本語", &base_meta(), 2, 1);
        assert_eq!(chunks.len(), 3);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, "日本語");
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "ログ取り込みが失敗しました、データベース接続を確認してください";
        let chunks = chunk_artifact("a1", text, &base_meta(), 10, 3);
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        // Valid UTF-8 slices throughout, nothing lost
        assert_eq!(joined.chars().count(), text.chars().count());
    }

    #[test]
    fn test_severity_detected_per_chunk() {
        let text = "2026-08-23T10:02:11Z [ERROR] db: connection refused\n2026-08-23T10:02:12Z [INFO] db: retrying";
        let chunks = chunk_artifact("a1", text, &base_meta(), 2000, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.severity.as_deref(), Some("ERROR"));

        assert_eq!(detect_severity("all quiet"), None);
        assert_eq!(detect_severity("[WARN] disk 90%"), Some("WARN"));
    }

    #[test]
    fn test_metadata_inherited() {
        let mut meta = base_meta();
        meta.ticket_id = Some("INC000000001".into());
        let chunks = chunk_artifact("a1", "Ticket body", &meta, 2000, 0);
        assert_eq!(chunks[0].metadata.ticket_id.as_deref(), Some("INC000000001"));
        assert_eq!(chunks[0].metadata.source_path, "logs/app.log");
    }
}

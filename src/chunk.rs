//! Layered-boundary source chunker.
//!
//! Splits one file's text into overlapping segments bounded by
//! `max_chars`, preferring to break at declaration boundaries, then blank
//! lines, then lines, then words, then raw characters. Adjacent chunks
//! share up to `overlap` trailing characters of context.
//!
//! Each chunk is stamped with a deterministic primary key: the SHA-256 of
//! `"{repo}|{file_path}|{chunk_index}|{text}"`. Identical inputs always
//! yield identical identities, so re-chunking unchanged content is
//! idempotent with no external ID allocator.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, SourceUnit};

/// Boundary preference order. The empty separator is the character-level
/// last resort and always matches.
const SEPARATORS: &[&str] = &[
    "\nclass ",
    "\ndef ",
    "\nasync def ",
    "\nfn ",
    "\npub fn ",
    "\n\n",
    "\n",
    " ",
    "",
];

/// Read a file's content, never failing on malformed text: strict UTF-8
/// first, then a permissive Latin-1 decoding that maps every byte to a char.
pub fn read_source_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => Ok(err.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

/// Build a [`SourceUnit`] for one file under `repo_root`.
///
/// The relative path is `/`-separated regardless of platform; the language
/// tag is the lowercased extension without the dot.
pub fn source_unit_from_file(
    repo_root: &Path,
    path: &Path,
    repo: &str,
    branch: &str,
    commit: &str,
) -> Result<SourceUnit> {
    let rel = path
        .strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let language = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let text = read_source_text(path)?;

    Ok(SourceUnit {
        repo: repo.to_string(),
        branch: branch.to_string(),
        commit: commit.to_string(),
        rel_path: rel,
        language,
        text,
    })
}

/// Deterministic chunk identity: SHA-256 over repo, path, position, and text.
pub fn chunk_pk(repo: &str, file_path: &str, chunk_index: i64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}|{}", repo, file_path, chunk_index, text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split a source unit into identified chunks.
///
/// Whitespace-only content produces no chunks. Pure function of the unit
/// plus the chunking parameters.
pub fn split_source_unit(unit: &SourceUnit, chunking: &ChunkingConfig) -> Vec<Chunk> {
    if unit.text.trim().is_empty() {
        return Vec::new();
    }

    let segments = split_text(&unit.text, chunking.max_chars, chunking.overlap);

    segments
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let index = i as i64;
            let hash = chunk_pk(&unit.repo, &unit.rel_path, index, &text);
            Chunk {
                pk: hash.clone(),
                repo: unit.repo.clone(),
                branch: unit.branch.clone(),
                commit: unit.commit.clone(),
                file_path: unit.rel_path.clone(),
                language: unit.language.clone(),
                chunk_index: index,
                chunk_hash: hash,
                text,
            }
        })
        .collect()
}

/// Split raw text into segments of at most `max_chars` characters, breaking
/// at the most semantic boundary available and carrying `overlap` characters
/// of trailing context between adjacent segments.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    split_with(text, SEPARATORS, max_chars, overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_with(text: &str, separators: &[&str], max_chars: usize, overlap: usize) -> Vec<String> {
    // First separator that occurs in the text; "" always does.
    let pos = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len() - 1);
    let sep = separators[pos];
    let rest = &separators[pos + 1..];

    let pieces = split_keep_separator(text, sep);

    let mut chunks = Vec::new();
    let mut good: Vec<String> = Vec::new();

    for piece in pieces {
        if char_len(&piece) <= max_chars {
            good.push(piece);
        } else {
            if !good.is_empty() {
                chunks.extend(merge_pieces(std::mem::take(&mut good), max_chars, overlap));
            }
            if rest.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(split_with(&piece, rest, max_chars, overlap));
            }
        }
    }

    if !good.is_empty() {
        chunks.extend(merge_pieces(good, max_chars, overlap));
    }

    chunks
}

/// Split on `sep`, keeping the separator attached to the head of the
/// following piece so declaration keywords stay with their bodies. An empty
/// separator splits into individual characters.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(text[start..idx].to_string());
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

/// Greedily merge bounded pieces into segments of at most `max_chars`,
/// retaining up to `overlap` trailing characters when a segment is flushed.
fn merge_pieces(pieces: Vec<String>, max_chars: usize, overlap: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(&piece);

        if total + len > max_chars && !window.is_empty() {
            let segment = window.concat();
            let trimmed = segment.trim();
            if !trimmed.is_empty() {
                segments.push(trimmed.to_string());
            }
            // Drop leading pieces until only the overlap tail remains.
            while total > overlap || (total + len > max_chars && total > 0) {
                let first = window.remove(0);
                total -= char_len(&first);
            }
        }

        total += len;
        window.push(piece);
    }

    if !window.is_empty() {
        let segment = window.concat();
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(text: &str) -> SourceUnit {
        SourceUnit {
            repo: "acme".to_string(),
            branch: "main".to_string(),
            commit: "abc123".to_string(),
            rel_path: "src/app.py".to_string(),
            language: "py".to_string(),
            text: text.to_string(),
        }
    }

    fn default_chunking() -> ChunkingConfig {
        ChunkingConfig {
            max_chars: 1500,
            overlap: 200,
        }
    }

    #[test]
    fn test_small_file_single_chunk() {
        let chunks = split_source_unit(&unit("fn main() {\n    run();\n}\n"), &default_chunking());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].text.contains("run()"));
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        let chunks = split_source_unit(&unit("   \n\n\t  \n"), &default_chunking());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_pk_deterministic_across_runs() {
        let u = unit("def handler(event):\n    return event\n");
        let a = split_source_unit(&u, &default_chunking());
        let b = split_source_unit(&u, &default_chunking());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.pk, y.pk);
            assert_eq!(x.chunk_hash, y.chunk_hash);
        }
        assert_eq!(a[0].pk, chunk_pk("acme", "src/app.py", 0, &a[0].text));
    }

    #[test]
    fn test_pk_changes_with_position() {
        assert_ne!(
            chunk_pk("acme", "src/app.py", 0, "same text"),
            chunk_pk("acme", "src/app.py", 1, "same text")
        );
    }

    #[test]
    fn test_indices_contiguous_when_split() {
        let body = (0..60)
            .map(|i| format!("def f{}():\n    return {}\n", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_source_unit(
            &unit(&body),
            &ChunkingConfig {
                max_chars: 120,
                overlap: 20,
            },
        );
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_prefers_declaration_boundaries() {
        let body = "\
def alpha():
    return 1

def beta():
    return 2

def gamma():
    return 3
";
        let segments = split_text(body, 60, 0);
        assert!(segments.len() > 1);
        // Declaration keywords stay attached to their bodies.
        for seg in &segments[1..] {
            assert!(
                seg.starts_with("def "),
                "segment should start at a def boundary: {:?}",
                seg
            );
        }
    }

    #[test]
    fn test_segments_respect_budget() {
        let body = "x".repeat(5000);
        let segments = split_text(&body, 1500, 200);
        for seg in &segments {
            assert!(seg.chars().count() <= 1500);
        }
    }

    #[test]
    fn test_overlap_carries_trailing_context() {
        let body = (0..40)
            .map(|i| format!("line number {:03}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let segments = split_text(&body, 100, 40);
        assert!(segments.len() > 1);
        // Each segment after the first starts with text already seen at the
        // tail of its predecessor.
        for pair in segments.windows(2) {
            let head: String = pair[1].chars().take(10).collect();
            assert!(
                pair[0].contains(&head),
                "expected {:?} to overlap into {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_latin1_fallback_never_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.py");
        std::fs::write(&path, [0x66, 0x6f, 0x6f, 0xff, 0xfe, 0x62, 0x61, 0x72]).unwrap();
        let text = read_source_text(&path).unwrap();
        assert_eq!(text.chars().count(), 8);
        assert!(text.starts_with("foo"));
        assert!(text.ends_with("bar"));
    }
}

//! Context assembly.
//!
//! Renders ranked search hits into one bounded text block for the
//! generation collaborator. Deterministic and order-preserving; the block
//! is prepended to the generation prefix by the caller.

use crate::models::SearchHit;

/// Render hits into a context block tagged with the requested language.
/// Returns an empty string for an empty hit sequence.
pub fn build_rag_context_block(hits: &[SearchHit], language: &str) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "# Relevant {} snippets retrieved from the repository index:\n",
        language
    ));
    for hit in hits {
        out.push_str(&format!(
            "# --- {} (chunk {}) ---\n",
            hit.file_path, hit.chunk_index
        ));
        out.push_str(&format!("```{}\n", language));
        out.push_str(hit.text.trim_end());
        out.push_str("\n```\n");
    }
    out.push('\n');
    out
}

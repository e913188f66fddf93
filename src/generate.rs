//! Generation collaborator contract.
//!
//! The generative model runs outside this crate; this module defines the
//! seam it is called through plus the fill-in-the-middle prompt assembly
//! and stop-string handling shared by implementations.

use anyhow::Result;
use async_trait::async_trait;

pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";

/// Stop strings applied on top of any caller-provided extras.
pub const DEFAULT_STOP_STRINGS: &[&str] = &[
    "```",           // markdown fence
    "\n\n\n",        // too many blank lines
    "<|endoftext|>", // end marker (some tokenizers)
];

/// Why the model stopped emitting tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

/// A completion returned by the generation collaborator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// Sampling parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// When unset, inferred from temperature: sampling iff `temperature > 0`.
    pub do_sample: Option<bool>,
    pub extra_stop: Vec<String>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.2,
            top_p: 0.95,
            do_sample: None,
            extra_stop: Vec::new(),
        }
    }
}

impl GenerateParams {
    pub fn sampling(&self) -> bool {
        self.do_sample.unwrap_or(self.temperature > 0.0)
    }
}

/// The generation model seam. Implementations own their decoding loop;
/// stop-sequence matching happens on their side, independent of this core.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(
        &self,
        prefix: &str,
        suffix: &str,
        params: &GenerateParams,
    ) -> Result<Completion>;
}

/// Assemble a fill-in-the-middle prompt from the code around the cursor.
pub fn build_fim_prompt(prefix: &str, suffix: &str) -> String {
    format!("{FIM_PREFIX}{prefix}{FIM_SUFFIX}{suffix}{FIM_MIDDLE}")
}

/// Cut `text` at the earliest occurrence of any stop string, then drop
/// trailing whitespace. Empty stop strings are ignored.
pub fn strip_at_stop_strings(text: &str, stop_strings: &[&str]) -> String {
    let mut cut: Option<usize> = None;
    for s in stop_strings {
        if s.is_empty() {
            continue;
        }
        if let Some(idx) = text.find(s) {
            cut = Some(cut.map_or(idx, |c| c.min(idx)));
        }
    }

    let truncated = match cut {
        Some(idx) => &text[..idx],
        None => text,
    };
    truncated.trim_end_matches(['\n', '\r', '\t', ' ']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fim_prompt_layout() {
        let prompt = build_fim_prompt("def add(a, b):\n", "\nprint(add(1, 2))");
        assert!(prompt.starts_with(FIM_PREFIX));
        assert!(prompt.ends_with(FIM_MIDDLE));
        let suffix_pos = prompt.find(FIM_SUFFIX).unwrap();
        assert!(suffix_pos > FIM_PREFIX.len());
    }

    #[test]
    fn test_strip_cuts_at_earliest_stop() {
        let text = "return a + b\n```\nmore\n\n\nafter";
        let out = strip_at_stop_strings(text, DEFAULT_STOP_STRINGS);
        assert_eq!(out, "return a + b");
    }

    #[test]
    fn test_strip_without_stop_trims_trailing_whitespace() {
        let out = strip_at_stop_strings("x = 1\n\t  \n", &[]);
        assert_eq!(out, "x = 1");
    }

    #[test]
    fn test_strip_ignores_empty_stop_strings() {
        let out = strip_at_stop_strings("abc", &["", "b"]);
        assert_eq!(out, "a");
    }

    #[test]
    fn test_do_sample_inferred_from_temperature() {
        let mut params = GenerateParams::default();
        assert!(params.sampling());
        params.temperature = 0.0;
        assert!(!params.sampling());
        params.do_sample = Some(true);
        assert!(params.sampling());
    }
}

//! Compression model seam for the memory.
//!
//! [`Summarizer`] is the contract memory compression runs through. Two
//! implementations ship:
//!
//! - [`ExtractiveSummarizer`]: in-process, deterministic sentence scoring.
//!   The default: no model weights, same output for the same input.
//! - [`RemoteSummarizer`]: client for a hosted seq2seq summarization model;
//!   the generation hyperparameters (beam 4, length penalty 1.0, early
//!   stopping) ride in the request body.
//!
//! Length policy, shared by both: input shorter than `min_length * 1.5`
//! passes through unchanged; otherwise the target budget is
//! `max(min_length * 2, len / 2)`.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Minimum summary length used by the memory layer.
pub const DEFAULT_MIN_SUMMARY_LEN: usize = 64;

/// Produces a shorter rendition of a text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text` down to roughly `max(min_length * 2, len / 2)`
    /// characters. Texts under `min_length * 1.5` come back unchanged.
    async fn summarize(&self, text: &str, min_length: usize) -> Result<String>;
}

/// Target character budget for a summary of `len` characters.
fn summary_budget(len: usize, min_length: usize) -> usize {
    if len > min_length * 2 {
        len / 2
    } else {
        min_length * 2
    }
}

/// Cut at a char boundary at or below `max` bytes.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// EXTRACTIVE SUMMARIZER
// ============================================================================

/// Deterministic extractive summarizer.
///
/// Scores each sentence by the corpus frequency of its words (normalized by
/// sentence length), then keeps the best-scoring sentences in document order
/// until the budget is spent. No allocation survives a call; safe to share
/// process-wide.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }

    fn run(text: &str, min_length: usize) -> String {
        let budget = summary_budget(text.len(), min_length);

        let sentences = split_sentences(text);
        if sentences.len() <= 1 {
            return truncate_at_boundary(text, budget).to_string();
        }

        // Corpus word frequencies.
        let mut freq: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for sentence in &sentences {
            for word in tokenize(sentence) {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        // Score sentences; normalize by length so short filler does not win.
        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(i, sentence)| {
                let words: Vec<String> = tokenize(sentence).collect();
                let raw: usize = words.iter().map(|w| freq.get(w).copied().unwrap_or(0)).sum();
                let score = if words.is_empty() {
                    0.0
                } else {
                    raw as f64 / (words.len() as f64).sqrt()
                };
                (i, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Greedy selection, re-emitted in document order.
        let mut selected: Vec<usize> = Vec::new();
        let mut used = 0usize;
        for (idx, _) in scored {
            let cost = sentences[idx].len() + 1;
            if used + cost > budget && !selected.is_empty() {
                continue;
            }
            selected.push(idx);
            used += cost;
            if used >= budget {
                break;
            }
        }
        selected.sort_unstable();

        let summary = selected
            .into_iter()
            .map(|i| sentences[i].trim())
            .collect::<Vec<_>>()
            .join(" ");

        if summary.is_empty() || summary.len() >= text.len() {
            truncate_at_boundary(text, budget).to_string()
        } else {
            truncate_at_boundary(&summary, budget).to_string()
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, min_length: usize) -> Result<String> {
        if text.len() < min_length * 3 / 2 {
            return Ok(text.to_string());
        }
        let summary = Self::run(text, min_length);
        tracing::info!(
            from = text.len(),
            to = summary.len(),
            "memory text summarized"
        );
        Ok(summary)
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            let chunk = text[start..end].trim();
            if !chunk.is_empty() {
                sentences.push(text[start..end].trim());
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn tokenize(sentence: &str) -> impl Iterator<Item = String> + '_ {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
}

// ============================================================================
// REMOTE SUMMARIZER
// ============================================================================

/// Client for a hosted seq2seq summarization model.
///
/// On transport failure the input comes back unchanged (logged): losing a
/// compression pass must never lose the message itself.
#[derive(Debug, Clone)]
pub struct RemoteSummarizer {
    http: reqwest::Client,
    base_url: String,
}

#[derive(serde::Serialize)]
struct SummarizeRequest<'a> {
    text: &'a str,
    min_length: usize,
    max_length: usize,
    num_beams: u32,
    length_penalty: f32,
    early_stopping: bool,
}

#[derive(serde::Deserialize)]
struct SummarizeResponse {
    summary: String,
}

impl RemoteSummarizer {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    async fn summarize(&self, text: &str, min_length: usize) -> Result<String> {
        if text.len() < min_length * 3 / 2 {
            return Ok(text.to_string());
        }

        let request = SummarizeRequest {
            text,
            min_length,
            max_length: summary_budget(text.len(), min_length),
            num_beams: 4,
            length_penalty: 1.0,
            early_stopping: true,
        };

        let url = format!("{}/summarize", self.base_url);
        let outcome = async {
            let response = self.http.post(&url).json(&request).send().await?;
            response.error_for_status_ref()?;
            response.json::<SummarizeResponse>().await
        }
        .await;

        match outcome {
            Ok(parsed) => Ok(parsed.summary),
            Err(e) => {
                tracing::warn!(error = %e, "summarization model unavailable, keeping text");
                Ok(text.to_string())
            }
        }
    }
}

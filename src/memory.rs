//! Per-agent conversation memory.
//!
//! An ordered, append-only message log for one `(cid, agent kind)` pair,
//! durable through a [`DocumentStore`] and compressible through a
//! [`Summarizer`] when the active model's context budget comes under
//! pressure.
//!
//! Structural invariants:
//!
//! - index 0 is always the `system` role prompt; `clear`, `clear_section`,
//!   and `compress` never touch it
//! - messages are never reordered; mutation is limited to
//!   compression-in-place and explicit section deletion
//! - a trailing `user` message found on resume is dropped (it is an
//!   unanswered turn)
//!
//! Persistence failures are logged and swallowed: the in-memory view stays
//! authoritative and the turn succeeds.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use uuid::Uuid;

use crate::error::Error;
use crate::store::DocumentStore;
use crate::summarizer::{DEFAULT_MIN_SUMMARY_LEN, Summarizer};
use crate::types::{AgentKind, MemoryDocument, Message, Role};

/// Non-system messages longer than this are summarized by `compress`.
const COMPRESS_CONTENT_THRESHOLD: usize = 1024;

static MODEL_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)b").expect("valid model-size pattern"));

/// Estimate a model's usable context from its name.
///
/// The first integer immediately preceding a `b` (case-insensitive) is read
/// as a parameter count in billions `P`; the estimate is the power of two
/// nearest `4096 * (P/7)^1.5`. Names without a size hint return `None` and
/// compression is skipped.
pub fn ideal_ctx(model_name: &str) -> Option<usize> {
    let captures = MODEL_SIZE_RE.captures(model_name)?;
    let size: u32 = captures.get(1)?.as_str().parse().ok()?;
    if size == 0 {
        return None;
    }

    let scaled = 4096.0 * (f64::from(size) / 7.0).powf(1.5);
    let lower = 1usize.checked_shl(scaled.log2().floor() as u32)?;
    let upper = lower.checked_mul(2)?;
    // Nearest power of two by linear distance; ties go to the smaller one.
    let context = if scaled - lower as f64 <= upper as f64 - scaled {
        lower
    } else {
        upper
    };
    tracing::debug!(model = model_name, context, "estimated ideal context");
    Some(context)
}

/// Ordered message log for one agent of one session.
pub struct Memory {
    cid: String,
    agent_kind: AgentKind,
    messages: Vec<Message>,
    model_provider: String,
    memory_compression: bool,
    store: Arc<dyn DocumentStore>,
    summarizer: Arc<dyn Summarizer>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("cid", &self.cid)
            .field("agent_kind", &self.agent_kind)
            .field("messages", &self.messages.len())
            .field("model_provider", &self.model_provider)
            .finish()
    }
}

impl Memory {
    /// Create a memory seeded with the role prompt at index 0.
    ///
    /// A missing `cid` mints a fresh UUID. Construction does not hit the
    /// store; call [`Memory::load_memory`] to resume a persisted session.
    pub fn new(
        system_prompt: &str,
        cid: Option<String>,
        agent_kind: AgentKind,
        memory_compression: bool,
        model_provider: &str,
        store: Arc<dyn DocumentStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let cid = cid.unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            messages: vec![Message::new(Role::System, system_prompt, model_provider)],
            cid,
            agent_kind,
            model_provider: model_provider.to_string(),
            memory_compression,
            store,
            summarizer,
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn agent_kind(&self) -> AgentKind {
        self.agent_kind
    }

    pub fn model_provider(&self) -> &str {
        &self.model_provider
    }

    /// Current view of the log.
    pub fn get(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, compressing first when the incoming content
    /// overflows 1.5x the model's estimated context.
    ///
    /// Returns the index of the appended message. Content identical to the
    /// previous message is logged and still appended; with only the role
    /// prompt present the comparison runs against the role prompt itself.
    pub async fn push(
        &mut self,
        role: Role,
        content: &str,
        context: Option<String>,
        query: Option<String>,
    ) -> usize {
        let mut content = content.to_string();

        if self.memory_compression {
            if let Some(ideal) = ideal_ctx(&self.model_provider) {
                let threshold = (ideal as f64 * 1.5) as usize;
                if content.len() > threshold {
                    tracing::info!(
                        content_len = content.len(),
                        ideal_ctx = ideal,
                        "content exceeds model context, compressing memory"
                    );
                    self.compress().await;
                    content = self.summarize_or_keep(content).await;
                }
            }
        }

        if let Some(previous) = self.messages.last() {
            if previous.content == content {
                tracing::warn!("same message has been pushed twice to memory");
            }
        }

        let message =
            Message::new(role, content, &self.model_provider).with_retrieval(context, query);
        self.messages.push(message);
        self.save_memory().await;
        self.messages.len() - 1
    }

    /// Retain only the role prompt.
    pub async fn clear(&mut self) {
        tracing::info!(cid = %self.cid, "memory clear performed");
        self.messages.truncate(1);
        self.save_memory().await;
    }

    /// Remove an inclusive range of the non-system region.
    ///
    /// `start` and `end` are offsets into the region after the role prompt;
    /// both bounds are clamped and index 0 is never removable.
    pub async fn clear_section(&mut self, start: usize, end: usize) {
        let len = self.messages.len();
        if len <= 1 {
            return;
        }

        let lo = start.saturating_add(1).max(1);
        let hi = end.saturating_add(1).min(len - 1);
        if lo > hi {
            return;
        }

        tracing::info!(start, end, "clearing memory section");
        self.messages.drain(lo..=hi);
        self.save_memory().await;
    }

    /// Replace the whole log. The caller owns the index-0 invariant.
    pub fn reset(&mut self, messages: Vec<Message>) {
        tracing::info!(cid = %self.cid, "memory reset performed");
        self.messages = messages;
    }

    /// Summarize in place every non-system message whose content exceeds
    /// the compression threshold. Role, time, and order are preserved.
    pub async fn compress(&mut self) {
        if !self.memory_compression {
            tracing::warn!("memory compression disabled, skipping");
            return;
        }

        for i in 0..self.messages.len() {
            if self.messages[i].role == Role::System {
                continue;
            }
            if self.messages[i].content.len() > COMPRESS_CONTENT_THRESHOLD {
                let content = std::mem::take(&mut self.messages[i].content);
                self.messages[i].content = self.summarize_or_keep(content).await;
            }
        }
    }

    /// Truncate a text to the model's estimated context size.
    pub fn trim_text_to_max_ctx(&self, text: &str) -> String {
        match ideal_ctx(&self.model_provider) {
            Some(ideal) if text.len() > ideal => {
                let mut end = ideal;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                text[..end].to_string()
            }
            _ => text.to_string(),
        }
    }

    /// Upsert the memory document. Failure is logged; the in-memory view
    /// stays authoritative.
    pub async fn save_memory(&self) {
        let doc = MemoryDocument::new(
            &self.cid,
            self.agent_kind,
            self.messages.clone(),
            &self.model_provider,
        );
        if let Err(e) = self.store.upsert(&doc).await {
            let e = match e {
                Error::Persistence(_) => e,
                other => Error::persistence(other.to_string()),
            };
            tracing::warn!(cid = %self.cid, error = %e, "memory save failed");
        } else {
            tracing::debug!(cid = %self.cid, "memory saved");
        }
    }

    /// Resume from the persisted document, if one exists.
    ///
    /// A trailing `user` message is dropped (unanswered turn); the stored
    /// model tag is adopted; the recovered log is compressed.
    pub async fn load_memory(&mut self) {
        tracing::info!(cid = %self.cid, kind = %self.agent_kind, "loading past memories");
        match self.store.load(&self.cid, self.agent_kind).await {
            Ok(Some(doc)) if !doc.memory.is_empty() => {
                self.messages = doc.memory;
                self.model_provider = doc.model_provider;
                if matches!(self.messages.last(), Some(m) if m.role == Role::User) {
                    self.messages.pop();
                }
                self.compress().await;
                tracing::info!(cid = %self.cid, "session recovered");
            }
            Ok(_) => {
                tracing::info!(cid = %self.cid, "no memory to load for this cid");
            }
            Err(e) => {
                tracing::warn!(cid = %self.cid, error = %e, "memory load failed");
            }
        }
    }

    async fn summarize_or_keep(&self, content: String) -> String {
        match self
            .summarizer
            .summarize(&content, DEFAULT_MIN_SUMMARY_LEN)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, keeping content");
                content
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocStore;
    use crate::summarizer::ExtractiveSummarizer;

    fn memory(model: &str) -> Memory {
        Memory::new(
            "You are a helpful assistant.",
            Some("test-cid".to_string()),
            AgentKind::CasualAgent,
            true,
            model,
            Arc::new(MemoryDocStore::new()),
            Arc::new(ExtractiveSummarizer::new()),
        )
    }

    #[test]
    fn test_ideal_ctx_known_sizes() {
        assert_eq!(ideal_ctx("deepseek-r1:7b"), Some(4096));
        assert_eq!(ideal_ctx("deepseek-r1:13b"), Some(8192));
        assert_eq!(ideal_ctx("deepseek-r1:14b"), Some(8192));
        assert_eq!(ideal_ctx("qwen2.5:32b"), Some(32768));
        assert_eq!(ideal_ctx("llama3:70b"), Some(131072));
    }

    #[test]
    fn test_ideal_ctx_monotone_and_pow2() {
        let mut previous = 0;
        for size in [7u32, 13, 32, 70] {
            let ctx = ideal_ctx(&format!("model:{size}b")).unwrap();
            assert!(ctx.is_power_of_two());
            assert!(ctx >= previous);
            previous = ctx;
        }
    }

    #[test]
    fn test_ideal_ctx_absent_without_size_hint() {
        assert_eq!(ideal_ctx("gpt-4o"), None);
        assert_eq!(ideal_ctx(""), None);
    }

    #[tokio::test]
    async fn test_push_returns_appended_index() {
        let mut memory = memory("deepseek-r1:14b");
        let idx = memory.push(Role::User, "hello", None, None).await;
        assert_eq!(idx, 1);
        let idx = memory.push(Role::Assistant, "hi there", None, None).await;
        assert_eq!(idx, 2);
    }

    #[tokio::test]
    async fn test_duplicate_content_still_appended() {
        let mut memory = memory("deepseek-r1:14b");
        memory.push(Role::User, "same", None, None).await;
        memory.push(Role::User, "same", None, None).await;
        assert_eq!(memory.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_retains_role_prompt() {
        let mut memory = memory("deepseek-r1:14b");
        memory.push(Role::User, "one", None, None).await;
        memory.push(Role::Assistant, "two", None, None).await;
        memory.clear().await;

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get()[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_clear_section_inclusive_non_system() {
        let mut memory = memory("deepseek-r1:14b");
        for text in ["a", "b", "c", "d"] {
            memory.push(Role::User, text, None, None).await;
        }

        // Remove offsets 1..=2 of the non-system region: "b" and "c".
        memory.clear_section(1, 2).await;
        let contents: Vec<&str> = memory.get().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["You are a helpful assistant.", "a", "d"]);
    }

    #[tokio::test]
    async fn test_clear_section_clamps_and_spares_system() {
        let mut memory = memory("deepseek-r1:14b");
        memory.push(Role::User, "only", None, None).await;

        memory.clear_section(0, 99).await;
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get()[0].role, Role::System);

        // Out-of-range section on a prompt-only memory is a no-op.
        memory.clear_section(5, 9).await;
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_compress_spares_system_and_short_messages() {
        let mut memory = memory("deepseek-r1:14b");
        let long = "The planner decomposed the request into steps. ".repeat(60);
        memory.push(Role::User, "short", None, None).await;
        memory.push(Role::Assistant, &long, None, None).await;

        memory.compress().await;

        assert_eq!(memory.get()[0].content, "You are a helpful assistant.");
        assert_eq!(memory.get()[1].content, "short");
        assert!(memory.get()[2].content.len() < long.len());
    }

    #[tokio::test]
    async fn test_trim_text_to_max_ctx() {
        let memory = memory("deepseek-r1:7b");
        let long = "y".repeat(10_000);
        assert_eq!(memory.trim_text_to_max_ctx(&long).len(), 4096);
        assert_eq!(memory.trim_text_to_max_ctx("short"), "short");

        let unsized_model = Memory::new(
            "p",
            None,
            AgentKind::CoderAgent,
            true,
            "gpt-4o",
            Arc::new(MemoryDocStore::new()),
            Arc::new(ExtractiveSummarizer::new()),
        );
        assert_eq!(unsized_model.trim_text_to_max_ctx(&long).len(), 10_000);
    }
}

//! The polymorphic agent set.
//!
//! Every session registers one [`Agent`] per specialist role. Agents share
//! the capability set `{process, set_org, memory, kind, agent_name,
//! role_prompt}` but the retrieval agent takes a different `process` input
//! (bot key + tenant database instead of a speech handle); the conversation
//! engine dispatches on [`AgentKind`] rather than forcing one signature.
//!
//! Processing discipline, common to all kinds: push the user message before
//! the provider call, push the assistant message only on success, never push
//! partial output. Reasoning is peeled out of the model's
//! `<think>`/`<reasoning>` envelope.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::browser::Browser;
use crate::error::Result;
use crate::memory::Memory;
use crate::provider::Provider;
use crate::speech::SpeechSynthesizer;
use crate::store::{DocumentStore, KnowledgeStore};
use crate::summarizer::Summarizer;
use crate::types::{AgentKind, Role};

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think pattern"));
static REASONING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").expect("valid reasoning pattern")
});

/// Split a raw model response into `(answer, reasoning)`.
///
/// Models emit reasoning either as a `<think>` block (deepseek style) or a
/// `<reasoning>` block; the remainder is the answer. A response that is all
/// reasoning falls back to using it as the answer too.
pub(crate) fn split_reasoning(raw: &str) -> (String, String) {
    for re in [&*THINK_RE, &*REASONING_RE] {
        if let Some(captures) = re.captures(raw) {
            let reasoning = captures
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let answer = re.replace(raw, "").trim().to_string();
            if answer.is_empty() {
                return (reasoning.clone(), reasoning);
            }
            return (answer, reasoning);
        }
    }
    (raw.trim().to_string(), String::new())
}

/// Role prompt for an agent kind under the selected personality.
pub fn role_prompt(kind: AgentKind, jarvis_personality: bool) -> &'static str {
    if jarvis_personality {
        match kind {
            AgentKind::CasualAgent => include_str!("../prompts/jarvis/casual_agent.txt"),
            AgentKind::CoderAgent => include_str!("../prompts/jarvis/coder_agent.txt"),
            AgentKind::FileAgent => include_str!("../prompts/jarvis/file_agent.txt"),
            AgentKind::PlannerAgent => include_str!("../prompts/jarvis/planner_agent.txt"),
            AgentKind::BrowserAgent => include_str!("../prompts/jarvis/browser_agent.txt"),
            AgentKind::McpAgent => include_str!("../prompts/jarvis/mcp_agent.txt"),
            AgentKind::RetrievalAgent => include_str!("../prompts/jarvis/retrieval_agent.txt"),
        }
    } else {
        match kind {
            AgentKind::CasualAgent => include_str!("../prompts/base/casual_agent.txt"),
            AgentKind::CoderAgent => include_str!("../prompts/base/coder_agent.txt"),
            AgentKind::FileAgent => include_str!("../prompts/base/file_agent.txt"),
            AgentKind::PlannerAgent => include_str!("../prompts/base/planner_agent.txt"),
            AgentKind::BrowserAgent => include_str!("../prompts/base/browser_agent.txt"),
            AgentKind::McpAgent => include_str!("../prompts/base/mcp_agent.txt"),
            AgentKind::RetrievalAgent => include_str!("../prompts/base/retrieval_agent.txt"),
        }
    }
}

/// A role-specialized participant with its own memory.
pub struct Agent {
    kind: AgentKind,
    name: String,
    role_prompt: String,
    memory: Memory,
    provider: Arc<Provider>,
    browser: Option<Arc<Browser>>,
    org: Option<String>,
    uid: Option<String>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("memory_len", &self.memory.len())
            .finish()
    }
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: AgentKind,
        name: impl Into<String>,
        role_prompt: impl Into<String>,
        cid: &str,
        memory_compression: bool,
        provider: Arc<Provider>,
        browser: Option<Arc<Browser>>,
        store: Arc<dyn DocumentStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let role_prompt = role_prompt.into();
        let memory = Memory::new(
            &role_prompt,
            Some(cid.to_string()),
            kind,
            memory_compression,
            provider.model_name(),
            store,
            summarizer,
        );
        Self {
            kind,
            name: name.into(),
            role_prompt,
            memory,
            provider,
            browser,
            org: None,
            uid: None,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn agent_name(&self) -> &str {
        &self.name
    }

    pub fn role_prompt(&self) -> &str {
        &self.role_prompt
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn browser(&self) -> Option<&Arc<Browser>> {
        self.browser.as_ref()
    }

    /// The provider shared by every agent of the session.
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Stamp tenant scope before a `process` call that hits per-tenant
    /// resources.
    pub fn set_org(&mut self, org: &str, uid: &str) {
        tracing::debug!(agent = %self.name, org, uid, "tenant scope set");
        self.org = Some(org.to_string());
        self.uid = Some(uid.to_string());
    }

    pub fn org(&self) -> Option<&str> {
        self.org.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Handle one turn for every agent kind except retrieval.
    ///
    /// In-band provider strings (overload, offline, interrupt) come back as
    /// regular answers.
    pub async fn process(
        &mut self,
        query: &str,
        speech: Option<&dyn SpeechSynthesizer>,
    ) -> Result<(String, String)> {
        tracing::info!(agent = %self.name, kind = %self.kind, "processing query");
        self.memory.push(Role::User, query, None, None).await;

        let raw = self.provider.respond(self.memory.get()).await?;
        let (answer, reasoning) = split_reasoning(&raw);

        self.memory.push(Role::Assistant, &answer, None, None).await;
        if let Some(speech) = speech {
            speech.speak(&answer).await;
        }
        Ok((answer, reasoning))
    }

    /// Handle one turn for the retrieval agent.
    ///
    /// Knowledge-base excerpts ride on the pushed user message as its
    /// `context`; a failed or absent tenant database degrades to an
    /// ungrounded answer rather than failing the turn.
    pub async fn process_retrieval(
        &mut self,
        query: &str,
        bot_key: Option<&str>,
        db: Option<&Arc<dyn KnowledgeStore>>,
    ) -> Result<(String, String)> {
        tracing::info!(agent = %self.name, "processing retrieval query");

        let context = match (bot_key, db) {
            (Some(key), Some(db)) => match db.search(key, query).await {
                Ok(excerpts) if !excerpts.is_empty() => Some(excerpts.join("\n\n")),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "knowledge base search failed");
                    None
                }
            },
            _ => {
                tracing::warn!("retrieval dispatched without bot key or tenant db");
                None
            }
        };

        self.memory
            .push(Role::User, query, context, Some(query.to_string()))
            .await;

        let raw = self.provider.respond(self.memory.get()).await?;
        let (answer, reasoning) = split_reasoning(&raw);

        self.memory.push(Role::Assistant, &answer, None, None).await;
        Ok((answer, reasoning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocStore;
    use crate::summarizer::ExtractiveSummarizer;

    fn agent(kind: AgentKind) -> Agent {
        let provider = Arc::new(Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap());
        Agent::new(
            kind,
            "tester",
            role_prompt(kind, false),
            "cid-agent-test",
            true,
            provider,
            None,
            Arc::new(MemoryDocStore::new()),
            Arc::new(ExtractiveSummarizer::new()),
        )
    }

    #[test]
    fn test_split_reasoning_think_envelope() {
        let raw = "<think>\nThe user is greeting.\n</think>\nHello there!";
        let (answer, reasoning) = split_reasoning(raw);
        assert_eq!(answer, "Hello there!");
        assert_eq!(reasoning, "The user is greeting.");
    }

    #[test]
    fn test_split_reasoning_reasoning_envelope() {
        let raw = "<reasoning>steps</reasoning>final";
        let (answer, reasoning) = split_reasoning(raw);
        assert_eq!(answer, "final");
        assert_eq!(reasoning, "steps");
    }

    #[test]
    fn test_split_reasoning_plain_answer() {
        let (answer, reasoning) = split_reasoning("just an answer");
        assert_eq!(answer, "just an answer");
        assert!(reasoning.is_empty());
    }

    #[test]
    fn test_split_reasoning_reasoning_only() {
        let (answer, reasoning) = split_reasoning("<think>all thought</think>");
        assert_eq!(answer, "all thought");
        assert_eq!(reasoning, "all thought");
    }

    #[test]
    fn test_role_prompt_personalities_differ() {
        let base = role_prompt(AgentKind::CasualAgent, false);
        let jarvis = role_prompt(AgentKind::CasualAgent, true);
        assert_ne!(base, jarvis);
        assert!(jarvis.contains("JARVIS"));
    }

    #[tokio::test]
    async fn test_process_pushes_user_then_assistant() {
        let mut agent = agent(AgentKind::CasualAgent);
        let (answer, reasoning) = agent.process("hello", None).await.unwrap();

        assert!(!answer.is_empty());
        assert!(!reasoning.is_empty());
        let memory = agent.memory().get();
        assert_eq!(memory.len(), 3);
        assert_eq!(memory[1].role, Role::User);
        assert_eq!(memory[2].role, Role::Assistant);
        assert_eq!(memory[2].content, answer);
    }

    #[tokio::test]
    async fn test_process_failure_pushes_no_assistant() {
        let mut agent = agent(AgentKind::CoderAgent);
        let provider = Arc::new(Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap());
        provider
            .test_script()
            .unwrap()
            .push_failure("schema mismatch");
        agent.provider = provider;

        let err = agent.process("write code", None).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Provider { .. }));
        // User message pushed, assistant not.
        let memory = agent.memory().get();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory[1].role, Role::User);
    }

    struct FixedKnowledge;

    #[async_trait::async_trait]
    impl KnowledgeStore for FixedKnowledge {
        async fn search(&self, _bot_key: &str, _query: &str) -> Result<Vec<String>> {
            Ok(vec!["Refunds are granted within 30 days.".to_string()])
        }
    }

    #[tokio::test]
    async fn test_retrieval_attaches_context() {
        let mut agent = agent(AgentKind::RetrievalAgent);
        let db: Arc<dyn KnowledgeStore> = Arc::new(FixedKnowledge);

        agent
            .process_retrieval("what about refunds?", Some("cx-key"), Some(&db))
            .await
            .unwrap();

        let user_msg = &agent.memory().get()[1];
        assert_eq!(user_msg.role, Role::User);
        assert!(user_msg.context.as_deref().unwrap().contains("30 days"));
        assert_eq!(user_msg.query.as_deref(), Some("what about refunds?"));
    }

    #[tokio::test]
    async fn test_retrieval_without_db_still_answers() {
        let mut agent = agent(AgentKind::RetrievalAgent);
        let (answer, _) = agent
            .process_retrieval("what about refunds?", None, None)
            .await
            .unwrap();
        assert!(!answer.is_empty());
        assert!(agent.memory().get()[1].context.is_none());
    }
}

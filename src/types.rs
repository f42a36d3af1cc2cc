//! Core type definitions for the orchestrator.
//!
//! The type system splits into three groups:
//!
//! - **Conversation types**: [`Role`] and [`Message`], the unit stored in an
//!   agent's memory and sent to a provider. Messages carry a wall-clock
//!   timestamp, the model tag that produced them, and the optional
//!   retrieval fields (`context`, `query`).
//! - **Persistence types**: [`MemoryDocument`], the single document upserted
//!   into the `agents_chat` collection for one `(cid, agent kind)` pair.
//! - **Wire types**: request/response payloads for the OpenAI-compatible and
//!   Ollama chat APIs. Internal types are deliberately distinct from the
//!   wire format so provider support stays swappable.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used for every stored message.
pub(crate) const MESSAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// CONVERSATION TYPES
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The role prompt pinned at index 0 of every memory.
    System,
    /// A client query.
    User,
    /// A model answer.
    Assistant,
}

impl Role {
    /// Stable lowercase tag, matching the persisted document format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in an agent's memory.
///
/// `context` and `query` are only populated by the retrieval agent, which
/// attaches the tenant knowledge-base excerpts it grounded the turn on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Wall-clock creation time, `YYYY-MM-DD HH:MM:SS`.
    pub time: String,
    /// Model tag active when the message was recorded.
    pub model_used: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,
}

impl Message {
    /// Create a message stamped with the current local time.
    pub fn new(role: Role, content: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            time: Local::now().format(MESSAGE_TIME_FORMAT).to_string(),
            model_used: model_used.into(),
            context: None,
            query: None,
        }
    }

    /// Attach retrieval grounding to the message.
    pub fn with_retrieval(mut self, context: Option<String>, query: Option<String>) -> Self {
        self.context = context;
        self.query = query;
        self
    }
}

// ============================================================================
// AGENT KINDS
// ============================================================================

/// The closed set of specialist agents a session registers.
///
/// The tag doubles as the persistence key suffix and the router's bank key,
/// so the string forms are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    CasualAgent,
    CoderAgent,
    FileAgent,
    PlannerAgent,
    BrowserAgent,
    McpAgent,
    RetrievalAgent,
}

impl AgentKind {
    /// Stable snake_case tag used in persisted documents and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::CasualAgent => "casual_agent",
            AgentKind::CoderAgent => "coder_agent",
            AgentKind::FileAgent => "file_agent",
            AgentKind::PlannerAgent => "planner_agent",
            AgentKind::BrowserAgent => "browser_agent",
            AgentKind::McpAgent => "mcp_agent",
            AgentKind::RetrievalAgent => "retrieval_agent",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PERSISTENCE TYPES
// ============================================================================

/// Collection every memory document lives in.
pub const MEMORY_COLLECTION: &str = "agents_chat";

/// The persisted unit: one document per `(cid, agent kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub cid: String,
    pub agent_kind: AgentKind,
    pub memory: Vec<Message>,
    pub model_provider: String,
    /// RFC 3339 upsert time.
    pub last_update: String,
}

impl MemoryDocument {
    /// Assemble a document stamped with the current time.
    pub fn new(
        cid: impl Into<String>,
        agent_kind: AgentKind,
        memory: Vec<Message>,
        model_provider: impl Into<String>,
    ) -> Self {
        Self {
            cid: cid.into(),
            agent_kind,
            memory,
            model_provider: model_provider.into(),
            last_update: Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// CHAT WIRE TYPES
// ============================================================================

/// Message in the shape both chat APIs accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatWireMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ChatWireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

/// Non-streaming request body for `POST /chat/completions`.
#[derive(Debug, Serialize)]
pub(crate) struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<ChatWireMessage>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChatResponse {
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChoice {
    pub message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResponseMessage {
    pub content: Option<String>,
}

/// Request body for Ollama's native `POST /api/chat`.
#[derive(Debug, Serialize)]
pub(crate) struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatWireMessage>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChatResponse {
    pub message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaResponseMessage {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tags() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_message_timestamp_shape() {
        let msg = Message::new(Role::User, "hi", "deepseek-r1:14b");
        // YYYY-MM-DD HH:MM:SS is exactly 19 characters.
        assert_eq!(msg.time.len(), 19);
        assert_eq!(&msg.time[4..5], "-");
        assert_eq!(&msg.time[10..11], " ");
    }

    #[test]
    fn test_message_optional_fields_skipped() {
        let msg = Message::new(Role::User, "hi", "m");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("context"));
        assert!(!json.contains("query"));

        let grounded = Message::new(Role::User, "hi", "m")
            .with_retrieval(Some("doc excerpt".into()), Some("hi".into()));
        let json = serde_json::to_string(&grounded).unwrap();
        assert!(json.contains("doc excerpt"));
    }

    #[test]
    fn test_agent_kind_tags() {
        assert_eq!(AgentKind::CasualAgent.as_str(), "casual_agent");
        assert_eq!(AgentKind::RetrievalAgent.as_str(), "retrieval_agent");
        let kind: AgentKind = serde_json::from_str("\"browser_agent\"").unwrap();
        assert_eq!(kind, AgentKind::BrowserAgent);
    }

    #[test]
    fn test_memory_document_roundtrip() {
        let doc = MemoryDocument::new(
            "cid-1",
            AgentKind::CasualAgent,
            vec![Message::new(Role::System, "You are helpful", "m")],
            "deepseek-r1:14b",
        );
        let json = serde_json::to_string(&doc).unwrap();
        let back: MemoryDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cid, "cid-1");
        assert_eq!(back.memory.len(), 1);
        assert_eq!(back.model_provider, "deepseek-r1:14b");
    }
}

//! # Polyagent
//!
//! A multi-agent conversational orchestrator. A client poses a natural
//! language query; the orchestrator selects the most appropriate specialist
//! agent (casual chat, coder, file manipulation, browser automation,
//! planner, retrieval) and drives it to an answer plus a reasoning trace.
//! Many conversations run concurrently, each owning an isolated agent pool,
//! browser instance, and memory store.
//!
//! ## Key pieces
//!
//! - **Session manager**: lifecycle of concurrent, isolated conversation
//!   instances, each owning heavyweight resources torn down on close or
//!   idle expiry
//! - **Router**: multilingual, paraphrase-robust selection of exactly one
//!   agent per query, with an embedding path and a keyword fallback
//! - **Interaction**: per-session conversation engine with a non-blocking
//!   "thinking" state machine observed by polling
//! - **Memory**: append-only per-agent message log with on-demand
//!   compression, durable through a document store
//! - **Provider**: normalized client over OpenAI-compatible and Ollama
//!   text-generation backends
//!
//! ## Example
//!
//! ```rust,no_run
//! use polyagent::{Settings, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> polyagent::Result<()> {
//!     let settings = Settings::from_file("config.ini")?;
//!     let manager = SessionManager::new(settings);
//!
//!     let cid = manager.create_session(None).await?;
//!     let interaction = manager.get_session(&cid).expect("just created");
//!
//!     interaction.set_query("hello, how are you?", None, None);
//!     interaction.think("user-1", "acme").await?;
//!
//!     // Callers usually poll instead of awaiting `think` directly:
//!     while interaction.is_generating() {
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     }
//!     println!("answer: {:?}", interaction.last_answer());
//!
//!     manager.close_session(&cid).await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// The polymorphic agent set: per-kind processing, tenant scoping, reasoning
/// extraction, and the embedded role prompts.
mod agent;

/// Per-session browser handle: launcher/driver seams, the WebDriver wire
/// client, and the idempotent quit guarantee.
mod browser;

/// Ini-style settings surface, environment lookups, and Docker detection.
mod config;

/// Error taxonomy and the crate-wide `Result` alias.
mod error;

/// Per-session conversation engine and turn state machine.
mod interaction;

/// Per-agent message log with compression and persistence.
mod memory;

/// Normalized LLM provider client over named backends.
mod provider;

/// Query-to-agent selection: language detection, example banks, embedding
/// and keyword scoring.
mod router;

/// Session registry, lifecycle, and the idle reaper.
mod session;

/// Text-to-speech contract seam.
mod speech;

/// Document store and tenant knowledge-base seams.
mod store;

/// Compression model seam with extractive and remote implementations.
mod summarizer;

/// Conversation, persistence, and wire types.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

// --- Sessions ---

pub use session::SessionManager;

// --- Conversation engine ---

pub use interaction::{Interaction, InteractionConfig};

// --- Agents ---

pub use agent::{Agent, role_prompt};

// --- Routing ---

pub use router::{AgentDescriptor, Embedder, HttpEmbedder, Router, detect_language};

// --- Memory ---

pub use memory::{Memory, ideal_ctx};

// --- Provider ---

pub use provider::{Provider, REQUEST_EXIT, TestScript};

// --- Persistence ---

pub use store::{DocumentStore, KnowledgeStore, MemoryDocStore, RestDocumentStore};

// --- Compression ---

pub use summarizer::{ExtractiveSummarizer, RemoteSummarizer, Summarizer};

// --- Browser ---

pub use browser::{
    Browser, BrowserDriver, BrowserLauncher, BrowserOptions, WebDriverLauncher,
    random_driver_port,
};

// --- Speech ---

pub use speech::SpeechSynthesizer;

// --- Configuration ---

pub use config::{Settings, is_running_in_docker};

// --- Errors ---

pub use error::{Error, Result};

// --- Core types ---

pub use types::{AgentKind, MemoryDocument, Message, Role, MEMORY_COLLECTION};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types and functions. Import with
/// `use polyagent::prelude::*;` for typical usage.
pub mod prelude {
    pub use crate::{
        Agent, AgentKind, Error, Interaction, InteractionConfig, Memory, Message, Provider,
        Result, Role, Router, SessionManager, Settings,
    };
}

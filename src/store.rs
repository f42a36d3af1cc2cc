//! Persistence seams: the memory document store and the per-tenant
//! knowledge base.
//!
//! [`DocumentStore`] abstracts over where memory documents live. The
//! production implementation is [`RestDocumentStore`], a thin reqwest client
//! against a document-store HTTP API; [`MemoryDocStore`] keeps everything in
//! process and backs tests and endpoint-less deployments. Both serve the
//! fixed `agents_chat` collection.
//!
//! [`KnowledgeStore`] is the retrieval agent's database handle: a named
//! contract only, the concrete schema stays outside this crate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{AgentKind, MemoryDocument, MEMORY_COLLECTION};

/// Per-request timeout for document-store HTTP calls.
const DOCSTORE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// DOCUMENT STORE
// ============================================================================

/// Durable home of memory documents, keyed on `(cid, agent kind)`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the document for one agent of one session, if any.
    async fn load(&self, cid: &str, kind: AgentKind) -> Result<Option<MemoryDocument>>;

    /// Insert or replace the document.
    async fn upsert(&self, doc: &MemoryDocument) -> Result<()>;
}

// ============================================================================
// REST IMPLEMENTATION
// ============================================================================

/// Document store over an HTTP API.
///
/// Layout: `GET/PUT {base}/collections/agents_chat/{cid}/{kind}`. Created
/// once per deployment and shared across sessions; the underlying
/// `reqwest::Client` keeps a connection pool.
#[derive(Debug, Clone)]
pub struct RestDocumentStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestDocumentStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOCSTORE_TIMEOUT)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, cid: &str, kind: AgentKind) -> String {
        format!(
            "{}/collections/{}/{}/{}",
            self.base_url,
            MEMORY_COLLECTION,
            cid,
            kind.as_str()
        )
    }

    fn decorate(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn load(&self, cid: &str, kind: AgentKind) -> Result<Option<MemoryDocument>> {
        let response = self
            .decorate(self.http.get(self.url(cid, kind)))
            .send()
            .await
            .map_err(|e| Error::persistence(format!("document load failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::persistence(format!(
                "document load HTTP {}",
                response.status()
            )));
        }

        let doc = response
            .json::<MemoryDocument>()
            .await
            .map_err(|e| Error::persistence(format!("document decode failed: {e}")))?;
        Ok(Some(doc))
    }

    async fn upsert(&self, doc: &MemoryDocument) -> Result<()> {
        let response = self
            .decorate(self.http.put(self.url(&doc.cid, doc.agent_kind)).json(doc))
            .send()
            .await
            .map_err(|e| Error::persistence(format!("document upsert failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::persistence(format!(
                "document upsert HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// IN-PROCESS IMPLEMENTATION
// ============================================================================

/// In-process document store.
///
/// The default when no `DOCSTORE_URL` is configured; documents live for the
/// process lifetime only.
#[derive(Debug, Default)]
pub struct MemoryDocStore {
    docs: RwLock<HashMap<(String, AgentKind), MemoryDocument>>,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents, across all sessions.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocStore {
    async fn load(&self, cid: &str, kind: AgentKind) -> Result<Option<MemoryDocument>> {
        Ok(self.docs.read().get(&(cid.to_string(), kind)).cloned())
    }

    async fn upsert(&self, doc: &MemoryDocument) -> Result<()> {
        self.docs
            .write()
            .insert((doc.cid.clone(), doc.agent_kind), doc.clone());
        Ok(())
    }
}

// ============================================================================
// KNOWLEDGE STORE
// ============================================================================

/// Per-tenant knowledge base the retrieval agent grounds answers on.
///
/// `bot_key` scopes the lookup to one tenant bot; the return value is a list
/// of plain-text excerpts ranked by relevance.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn search(&self, bot_key: &str, query: &str) -> Result<Vec<String>>;
}

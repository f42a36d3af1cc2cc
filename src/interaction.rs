//! Per-session conversation engine.
//!
//! An [`Interaction`] owns one session's agent set and drives the turn state
//! machine:
//!
//! ```text
//! IDLE --set_query--> QUEUED --think--> ROUTING --> PROCESSING --> IDLE
//!                                        |               |
//!                                        +-- no agent ---+ (think returns false)
//! ```
//!
//! Callers poll rather than await: `last_answer` and `is_generating` are
//! readable while `think` runs, and every field `think` writes is visible by
//! the time `is_generating` drops to false. Turns within one session are
//! serialized by the async lock around the agent set; sessions never share
//! state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::agent::Agent;
use crate::browser::Browser;
use crate::error::Result;
use crate::router::{AgentDescriptor, Embedder, Router};
use crate::speech::SpeechSynthesizer;
use crate::store::KnowledgeStore;
use crate::types::{AgentKind, Role};

/// Clears the generating flag on every exit path, panics included.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Construction-time wiring for an interaction.
#[derive(Default)]
pub struct InteractionConfig {
    /// Supported languages; the first is primary.
    pub languages: Vec<String>,
    /// Session-shared browser handle, quit on close.
    pub browser: Option<Arc<Browser>>,
    /// Voice for answers, when the session speaks.
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    /// Sentence encoder for the router; keyword matching without one.
    pub embedder: Option<Arc<dyn Embedder>>,
}

/// Turn-scoped fields, written under one lock so pollers see a consistent
/// snapshot.
#[derive(Default)]
struct TurnState {
    current_agent: Option<usize>,
    last_query: Option<String>,
    last_answer: Option<String>,
    last_reasoning: Option<String>,
    bot_key: Option<String>,
    db: Option<Arc<dyn KnowledgeStore>>,
}

/// Conversation driver and state holder for one session.
pub struct Interaction {
    agents: Mutex<Vec<Agent>>,
    router: Router,
    browser: Option<Arc<Browser>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    languages: Vec<String>,
    ai_name: String,
    is_active: AtomicBool,
    is_generating: AtomicBool,
    state: RwLock<TurnState>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl std::fmt::Debug for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interaction")
            .field("ai_name", &self.ai_name)
            .field("is_active", &self.is_active.load(Ordering::SeqCst))
            .field("is_generating", &self.is_generating.load(Ordering::SeqCst))
            .finish()
    }
}

impl Interaction {
    /// Wrap an agent set in a conversation engine.
    ///
    /// The router registers agents in the order given; the casual agent's
    /// name becomes the session's spoken name.
    pub fn new(agents: Vec<Agent>, config: InteractionConfig) -> Self {
        let descriptors: Vec<AgentDescriptor> = agents
            .iter()
            .map(|a| AgentDescriptor::for_kind(a.kind(), a.agent_name()))
            .collect();

        let mut router = Router::new(descriptors, config.languages.clone());
        if let Some(embedder) = config.embedder {
            router = router.with_embedder(embedder);
        }

        let ai_name = agents
            .iter()
            .find(|a| a.kind() == AgentKind::CasualAgent)
            .map(|a| a.agent_name().to_string())
            .unwrap_or_else(|| "jarvis".to_string());

        tracing::info!(ai_name = %ai_name, agents = agents.len(), "interaction ready");

        Self {
            agents: Mutex::new(agents),
            router,
            browser: config.browser,
            speech: config.speech,
            languages: config.languages,
            ai_name,
            is_active: AtomicBool::new(true),
            is_generating: AtomicBool::new(false),
            state: RwLock::new(TurnState::default()),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    // ── observation ─────────────────────────────────────────────────────

    pub fn ai_name(&self) -> &str {
        &self.ai_name
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The session's shared browser handle, when one was acquired.
    ///
    /// Teardown fallback for sessions without a registered browser agent;
    /// [`Interaction::browser_agent`] is the primary discovery path.
    pub fn browser(&self) -> Option<&Arc<Browser>> {
        self.browser.as_ref()
    }

    /// Index of the browser agent in the session's agent set, if one is
    /// registered.
    pub fn browser_agent_index(&self) -> Option<usize> {
        self.router
            .descriptors()
            .iter()
            .position(|d| d.kind == AgentKind::BrowserAgent)
    }

    /// The browser handle owned by the session's browser agent.
    ///
    /// Waits for any in-flight turn to finish before reading the agent set.
    pub async fn browser_agent(&self) -> Option<Arc<Browser>> {
        let agents = self.agents.lock().await;
        agents
            .iter()
            .find(|a| a.kind() == AgentKind::BrowserAgent)
            .and_then(|a| a.browser().cloned())
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<String> {
        self.state.read().last_query.clone()
    }

    pub fn last_answer(&self) -> Option<String> {
        self.state.read().last_answer.clone()
    }

    pub fn last_reasoning(&self) -> Option<String> {
        self.state.read().last_reasoning.clone()
    }

    /// Kind of the agent that handled the last routed turn.
    pub fn current_agent_kind(&self) -> Option<AgentKind> {
        let idx = self.state.read().current_agent?;
        self.router.descriptors().get(idx).map(|d| d.kind)
    }

    /// When the session was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last query or turn, for idle eviction.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Exclusive access to the agent set. Held across a whole turn by
    /// `think`; external holders serialize with it.
    pub async fn agents(&self) -> MutexGuard<'_, Vec<Agent>> {
        self.agents.lock().await
    }

    // ── turn state machine ──────────────────────────────────────────────

    /// Queue a query: IDLE -> QUEUED.
    ///
    /// Records the turn inputs and refreshes activity; never touches the
    /// model.
    pub fn set_query(
        &self,
        query: &str,
        bot_key: Option<String>,
        db: Option<Arc<dyn KnowledgeStore>>,
    ) {
        let mut state = self.state.write();
        state.last_query = Some(query.to_string());
        state.bot_key = bot_key;
        state.db = db;
        drop(state);

        self.is_active.store(true, Ordering::SeqCst);
        self.touch();
    }

    /// Run the queued turn to completion.
    ///
    /// Returns `false` without side effects when no query is queued or no
    /// agent is registered. Otherwise routes, stamps tenant scope, threads
    /// the previous answer across an agent switch, dispatches on the agent
    /// kind, and captures `(last_answer, last_reasoning)`. The generating
    /// flag is cleared on every exit path.
    pub async fn think(&self, uid: &str, org: &str) -> Result<bool> {
        let Some(query) = self.last_query() else {
            return Ok(false);
        };

        self.touch();

        let Some(selected) = self.router.select_agent(&query).await else {
            return Ok(false);
        };

        let (bot_key, db, handoff_answer) = {
            let mut state = self.state.write();
            let switched = state.current_agent != Some(selected);
            let handoff = if switched {
                state.last_answer.clone()
            } else {
                None
            };
            state.current_agent = Some(selected);
            (state.bot_key.clone(), state.db.clone(), handoff)
        };

        let mut agents = self.agents.lock().await;
        let agent = &mut agents[selected];
        agent.set_org(org, uid);

        // Cross-agent handoff: the previous answer becomes context for the
        // newly selected agent.
        if let Some(prior) = handoff_answer {
            agent
                .memory_mut()
                .push(Role::Assistant, &prior, None, None)
                .await;
        }

        self.is_generating.store(true, Ordering::SeqCst);
        let _guard = GeneratingGuard(&self.is_generating);

        let outcome = match agent.kind() {
            AgentKind::RetrievalAgent => {
                agent
                    .process_retrieval(&query, bot_key.as_deref(), db.as_ref())
                    .await
            }
            _ => agent.process(&query, self.speech.as_deref()).await,
        };

        let (answer, reasoning) = outcome?;
        let mut state = self.state.write();
        state.last_answer = Some(answer);
        state.last_reasoning = Some(reasoning);
        drop(state);

        // _guard drops here: pollers observing is_generating == false see
        // the answer fields already written.
        Ok(true)
    }

    /// Release the session's browser driver. Idempotent.
    ///
    /// The driver is found through the browser agent; waiting on the agent
    /// lock means the quit lands after the current turn completes. Sessions
    /// without a browser agent fall back to the handle given at
    /// construction.
    pub async fn close(&self) {
        self.is_active.store(false, Ordering::SeqCst);
        let browser = match self.browser_agent().await {
            Some(handle) => Some(handle),
            None => self.browser.clone(),
        };
        if let Some(browser) = browser {
            if let Err(e) = browser.quit().await {
                tracing::warn!(error = %e, "browser teardown failed");
            }
        }
    }

    /// Reload persisted memory for every agent except the planner (its
    /// plans are turn-scoped scratch state).
    pub async fn load_last_session(&self) {
        let mut agents = self.agents.lock().await;
        for agent in agents.iter_mut() {
            if agent.kind() != AgentKind::PlannerAgent {
                agent.memory_mut().load_memory().await;
            }
        }
    }
}

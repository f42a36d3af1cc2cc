//! Session registry and lifecycle.
//!
//! [`SessionManager`] is the only process-wide mutable state: a mutex-guarded
//! map from `cid` to its [`Interaction`]. The mutex is held strictly across
//! registry mutation; construction, teardown, and every other piece of I/O
//! run unlocked.
//!
//! A session atomically acquires its heavyweight resources (provider client,
//! browser driver on a random high port, six specialist agents, conversation
//! engine); any acquisition failure releases what was taken and leaves the
//! registry untouched. The idle reaper is crash-only: it logs and keeps
//! sweeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::agent::{Agent, role_prompt};
use crate::browser::{BrowserLauncher, BrowserOptions, WebDriverLauncher, random_driver_port};
use crate::config::{
    Settings, docstore_api_key, docstore_url, embedding_model, embedding_url, summarizer_url,
};
use crate::error::{Error, Result};
use crate::interaction::{Interaction, InteractionConfig};
use crate::provider::Provider;
use crate::router::{Embedder, HttpEmbedder};
use crate::speech::SpeechSynthesizer;
use crate::store::{DocumentStore, MemoryDocStore, RestDocumentStore};
use crate::summarizer::{ExtractiveSummarizer, RemoteSummarizer, Summarizer};
use crate::types::AgentKind;

/// Registry and lifecycle of concurrent conversation sessions.
pub struct SessionManager {
    settings: Settings,
    sessions: Mutex<HashMap<String, Arc<Interaction>>>,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn DocumentStore>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Option<Arc<dyn Embedder>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl SessionManager {
    /// Build a manager wired from the settings and environment: a REST
    /// document store when `DOCSTORE_URL` is set (in-process otherwise), a
    /// remote summarizer when `SUMMARIZER_URL` is set (extractive
    /// otherwise), and an HTTP sentence encoder when `EMBEDDING_URL` is set.
    pub fn new(settings: Settings) -> Self {
        let store: Arc<dyn DocumentStore> = match docstore_url() {
            Some(url) => match RestDocumentStore::new(url, docstore_api_key()) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "document store client failed, using in-process store");
                    Arc::new(MemoryDocStore::new())
                }
            },
            None => Arc::new(MemoryDocStore::new()),
        };

        let summarizer: Arc<dyn Summarizer> = match summarizer_url() {
            Some(url) => match RemoteSummarizer::new(url) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    tracing::warn!(error = %e, "remote summarizer client failed, using extractive");
                    Arc::new(ExtractiveSummarizer::new())
                }
            },
            None => Arc::new(ExtractiveSummarizer::new()),
        };

        let embedder: Option<Arc<dyn Embedder>> = embedding_url().and_then(|url| {
            let model = embedding_model().unwrap_or_else(|| "nomic-embed-text".to_string());
            match HttpEmbedder::new(url, model) {
                Ok(e) => Some(Arc::new(e) as Arc<dyn Embedder>),
                Err(e) => {
                    tracing::warn!(error = %e, "encoder client failed, keyword routing in effect");
                    None
                }
            }
        });

        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            launcher: Arc::new(WebDriverLauncher::new()),
            store,
            summarizer,
            embedder,
            speech: None,
        }
    }

    /// Swap the browser launcher (tests, alternative drivers).
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Swap the document store.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }

    /// Swap the summarization model.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Swap the router's sentence encoder.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Plug in a speech engine for sessions with `speak` enabled.
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Allocate a new session and register it.
    ///
    /// Mints a fresh `cid` when none is given. Construction is atomic with
    /// respect to the registry: a browser or provider failure releases the
    /// acquired resources and no partial session is registered.
    pub async fn create_session(&self, cid: Option<String>) -> Result<String> {
        let cid = cid.unwrap_or_else(|| Uuid::new_v4().to_string());
        let main = &self.settings.main;

        let provider = Arc::new(Provider::new(
            &main.provider_name,
            &main.provider_model,
            &main.provider_server_address,
            main.is_local,
        )?);

        let options = BrowserOptions {
            headless: self.settings.effective_headless(),
            stealth_mode: self.settings.browser.stealth_mode,
            lang: self.settings.primary_language().to_string(),
        };
        let port = random_driver_port();
        let browser = match self.launcher.launch(&options, port).await {
            Ok(browser) => Arc::new(browser),
            Err(e) => {
                tracing::error!(cid = %cid, port, error = %e, "failed to create browser for session");
                return Err(Error::resource(format!(
                    "browser launch failed for session {cid}: {e}"
                )));
            }
        };

        let jarvis = main.jarvis_personality;
        let build = |kind: AgentKind, name: &str, with_browser: bool| {
            Agent::new(
                kind,
                name,
                role_prompt(kind, jarvis),
                &cid,
                true,
                provider.clone(),
                with_browser.then(|| browser.clone()),
                self.store.clone(),
                self.summarizer.clone(),
            )
        };

        let agents = vec![
            build(AgentKind::CasualAgent, &main.agent_name, false),
            build(AgentKind::CoderAgent, "coder", false),
            build(AgentKind::FileAgent, "file", false),
            build(AgentKind::RetrievalAgent, "retrieval", false),
            build(AgentKind::BrowserAgent, "Browser", true),
            build(AgentKind::PlannerAgent, "Planner", true),
        ];

        let interaction = Arc::new(Interaction::new(
            agents,
            InteractionConfig {
                languages: main.languages.clone(),
                browser: Some(browser),
                speech: if main.speak { self.speech.clone() } else { None },
                embedder: self.embedder.clone(),
            },
        ));

        if self.embedder.is_some() {
            if let Err(e) = interaction.router().initialize().await {
                tracing::warn!(cid = %cid, error = %e, "router encoder unavailable, keyword matching in effect");
            }
        }
        if main.recover_last_session {
            interaction.load_last_session().await;
        }

        self.sessions.lock().insert(cid.clone(), interaction);
        tracing::info!(cid = %cid, "created session");
        Ok(cid)
    }

    /// Constant-time lookup.
    pub fn get_session(&self, cid: &str) -> Option<Arc<Interaction>> {
        self.sessions.lock().get(cid).cloned()
    }

    /// Remove a session and tear it down. Idempotent: a second call for the
    /// same `cid` is a no-op. The browser quits after the lock is released.
    pub async fn close_session(&self, cid: &str) {
        let interaction = self.sessions.lock().remove(cid);
        if let Some(interaction) = interaction {
            interaction.close().await;
            tracing::info!(cid, "closed session");
        }
    }

    /// One reaper sweep: close every session idle for longer than `timeout`.
    /// Returns the number of sessions closed.
    pub async fn reap_idle_once(&self, timeout: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, interaction)| interaction.last_activity().elapsed() > timeout)
            .map(|(cid, _)| cid.clone())
            .collect();

        let count = expired.len();
        for cid in expired {
            tracing::info!(cid = %cid, "reaping idle session");
            self.close_session(&cid).await;
        }
        count
    }

    /// Long-lived idle reaper: every `timeout`, sweep and close sessions
    /// whose last activity is older than `timeout`. Spawn this on its own
    /// task; it only returns if the manager is dropped mid-await.
    pub async fn cleanup_inactive_sessions(&self, timeout: Duration) {
        loop {
            tokio::time::sleep(timeout).await;
            let reaped = self.reap_idle_once(timeout).await;
            if reaped > 0 {
                tracing::info!(reaped, "idle sessions cleaned up");
            }
        }
    }
}

//! Agent selection.
//!
//! [`Router`] deterministically picks one agent for a free-text query. The
//! primary signal is embedding similarity: each agent kind carries a bank of
//! example utterances per supported language; the banks are embedded once at
//! startup into per-agent centroids and a query is scored by cosine
//! similarity against them. When no sentence encoder is configured (or the
//! encoder fails mid-flight) selection falls back to keyword and phrase
//! matching over the same banks, and an all-zero score falls back to the
//! casual agent with a warning.
//!
//! Selection is pure: the router never mutates agent or memory state, and
//! ties break by registration order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::AgentKind;

/// Timeout for a single embedding request.
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// LANGUAGE DETECTION
// ============================================================================

/// Stopword samples used to tally language evidence.
fn language_markers(lang: &str) -> &'static [&'static str] {
    match lang {
        "en" => &[
            "the", "is", "are", "you", "what", "how", "and", "for", "with", "this", "that",
            "please", "can", "does", "about", "hello",
        ],
        "fr" => &[
            "le", "la", "les", "une", "est", "que", "comment", "vous", "je", "et", "pour",
            "avec", "bonjour", "quelle", "dans",
        ],
        "es" => &[
            "el", "los", "una", "es", "que", "como", "usted", "yo", "para", "con", "hola",
            "donde", "cual",
        ],
        _ => &[],
    }
}

fn has_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        let c = c as u32;
        (0x4E00..=0x9FFF).contains(&c) || (0x3400..=0x4DBF).contains(&c)
    })
}

/// Detect the query language within the supported set.
///
/// CJK script wins immediately when `zh` is supported; otherwise stopword
/// tallies decide, defaulting to the first supported language.
pub fn detect_language(query: &str, supported: &[String]) -> String {
    let default = supported.first().cloned().unwrap_or_else(|| "en".to_string());

    if has_cjk(query) && supported.iter().any(|l| l == "zh") {
        return "zh".to_string();
    }

    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let mut best = (default.clone(), 0usize);
    for lang in supported {
        let markers = language_markers(lang);
        let hits = words.iter().filter(|w| markers.contains(&w.as_str())).count();
        if hits > best.1 {
            best = (lang.clone(), hits);
        }
    }
    best.0
}

// ============================================================================
// EXAMPLE BANKS
// ============================================================================

/// Example utterances for one agent kind in one language.
///
/// The English bank doubles as the fallback for languages without their own
/// bank.
fn example_bank(kind: AgentKind, lang: &str) -> &'static [&'static str] {
    match (kind, lang) {
        (AgentKind::CasualAgent, "zh") => &["你好", "你好吗", "早上好", "给我讲个笑话"],
        (AgentKind::CasualAgent, "fr") => &[
            "bonjour, comment ça va ?",
            "salut",
            "raconte-moi une blague",
        ],
        (AgentKind::CasualAgent, _) => &[
            "hello",
            "hi there",
            "how are you",
            "good morning",
            "tell me a joke",
            "what's up",
        ],
        (AgentKind::CoderAgent, "zh") => &["写一个python函数", "帮我修复这个bug", "写一段代码"],
        (AgentKind::CoderAgent, "fr") => &[
            "écris une fonction python",
            "corrige ce bug dans mon code",
        ],
        (AgentKind::CoderAgent, _) => &[
            "write a python function to sort a list",
            "implement a function that reverses a string",
            "fix this bug in my code",
            "write a script that parses a csv",
            "debug this stack trace",
            "write a sql query",
        ],
        (AgentKind::FileAgent, "zh") => &["找到这个文件", "重命名文件夹"],
        (AgentKind::FileAgent, "fr") => &["trouve le fichier rapport", "renomme ce dossier"],
        (AgentKind::FileAgent, _) => &[
            "find the file named report",
            "rename all files in this folder",
            "move my notes into the archive directory",
            "search my disk for large files",
        ],
        (AgentKind::PlannerAgent, "zh") => &["帮我制定一个计划", "把任务分解成步骤"],
        (AgentKind::PlannerAgent, "fr") => &["fais un plan pour ce projet"],
        (AgentKind::PlannerAgent, _) => &[
            "make a plan to build a web app",
            "break this project down into steps",
            "organize these tasks for the week",
            "plan a research workflow",
        ],
        (AgentKind::BrowserAgent, "zh") => &["上网搜索新闻", "打开这个网站"],
        (AgentKind::BrowserAgent, "fr") => &["cherche sur le web", "ouvre ce site"],
        (AgentKind::BrowserAgent, _) => &[
            "search the web for the latest news",
            "open the website and read the headline",
            "browse github for trending repositories",
            "look up the weather online",
        ],
        (AgentKind::McpAgent, "zh") => &["调用外部工具", "连接mcp服务器"],
        (AgentKind::McpAgent, "fr") => &["appelle l'outil externe"],
        (AgentKind::McpAgent, _) => &[
            "list the available mcp tools",
            "connect to the mcp server",
            "call the registered external tool",
        ],
        (AgentKind::RetrievalAgent, "zh") => &["知识库里怎么说", "查一下上传的文档"],
        (AgentKind::RetrievalAgent, "fr") => &["que dit le document sur ce sujet"],
        (AgentKind::RetrievalAgent, _) => &[
            "what do the docs say about this topic",
            "search the knowledge base for the answer",
            "what does the policy document say",
            "find this in the uploaded documents",
            "answer from our internal docs",
        ],
    }
}

fn default_description(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::CasualAgent => "friendly small talk and general conversation",
        AgentKind::CoderAgent => "writes and debugs code, scripts and queries",
        AgentKind::FileAgent => "finds, renames and organizes files and folders",
        AgentKind::PlannerAgent => "decomposes goals into ordered task plans",
        AgentKind::BrowserAgent => "browses the web and reads pages online",
        AgentKind::McpAgent => "drives external tools over the mcp protocol",
        AgentKind::RetrievalAgent => "answers from the tenant knowledge base and docs",
    }
}

/// Routing-facing view of one registered agent.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub name: String,
    pub description: String,
}

impl AgentDescriptor {
    /// Descriptor with the kind's stock description.
    pub fn for_kind(kind: AgentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: default_description(kind).to_string(),
        }
    }
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Multilingual sentence encoder.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Encoder client for an Ollama-compatible `/api/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "prompt": text });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::other(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::other(format!(
                "embedding HTTP {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::other(format!("embedding response invalid: {e}")))?;
        json.get("embedding")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64())
                    .map(|f| f as f32)
                    .collect()
            })
            .ok_or_else(|| Error::other("embedding response missing 'embedding' array"))
    }
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity in `[-1, 1]`; zero-magnitude or mismatched vectors
/// score 0.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut acc = vec![0.0f32; first.len()];
    for v in vectors {
        for (slot, val) in acc.iter_mut().zip(v) {
            *slot += val;
        }
    }
    let count = vectors.len() as f32;
    for val in &mut acc {
        *val /= count;
    }
    acc
}

// ============================================================================
// KEYWORD SCORING
// ============================================================================

/// Words carrying no routing signal, stripped from queries before overlap
/// scoring. Kept small on purpose: casual routing relies on phrase matches.
const SCORING_STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "am", "i", "you", "he", "she", "it", "we", "they", "me",
    "my", "your", "our", "this", "that", "these", "those", "to", "of", "in", "on", "at",
    "for", "with", "and", "or", "but", "do", "does", "did", "can", "could", "will", "would",
    "please", "what", "how", "why", "when", "where", "who", "about",
];

/// Lowercase, strip stopwords, singularize trailing `s`.
fn keyword_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !SCORING_STOPWORDS.contains(w))
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') {
                w[..w.len() - 1].to_string()
            } else {
                w.to_string()
            }
        })
        .collect()
}

fn overlap_score(query_tokens: &[String], text: &str) -> f32 {
    let tokens = keyword_tokens(text);
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens.iter().filter(|t| query_tokens.contains(t)).count();
    hits as f32 / (tokens.len() as f32).sqrt()
}

// ============================================================================
// ROUTER
// ============================================================================

type CentroidKey = (usize, String);

/// Query-to-agent classifier for one session.
pub struct Router {
    descriptors: Vec<AgentDescriptor>,
    supported_languages: Vec<String>,
    embedder: Option<Arc<dyn Embedder>>,
    centroids: RwLock<HashMap<CentroidKey, Vec<f32>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("agents", &self.descriptors.len())
            .field("languages", &self.supported_languages)
            .field("embedding", &self.embedder.is_some())
            .finish()
    }
}

impl Router {
    /// Keyword-mode router over the registered agents.
    pub fn new(descriptors: Vec<AgentDescriptor>, supported_languages: Vec<String>) -> Self {
        Self {
            descriptors,
            supported_languages,
            embedder: None,
            centroids: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a sentence encoder; call [`Router::initialize`] afterwards to
    /// build the example centroids.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Embed every example bank and build per-agent centroids.
    ///
    /// An encoder failure leaves the centroids empty; selection then runs in
    /// keyword mode.
    pub async fn initialize(&self) -> Result<()> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };

        let mut built: HashMap<CentroidKey, Vec<f32>> = HashMap::new();
        for (idx, descriptor) in self.descriptors.iter().enumerate() {
            for lang in &self.supported_languages {
                let examples = example_bank(descriptor.kind, lang);
                let mut vectors = Vec::with_capacity(examples.len());
                for example in examples {
                    vectors.push(embedder.embed(example).await?);
                }
                if !vectors.is_empty() {
                    built.insert((idx, lang.clone()), centroid(&vectors));
                }
            }
        }

        let count = built.len();
        *self.centroids.write() = built;
        tracing::info!(centroids = count, "router example banks embedded");
        Ok(())
    }

    /// Registered descriptors, in registration order.
    pub fn descriptors(&self) -> &[AgentDescriptor] {
        &self.descriptors
    }

    /// Select the agent for a query.
    ///
    /// Returns the index of the winning descriptor; `None` only when no
    /// agent is registered. Never mutates agent state.
    pub async fn select_agent(&self, query: &str) -> Option<usize> {
        if self.descriptors.is_empty() {
            return None;
        }

        let lang = detect_language(query, &self.supported_languages);

        if let Some(idx) = self.select_by_embedding(query, &lang).await {
            return Some(idx);
        }
        if let Some(idx) = self.select_by_keywords(query, &lang) {
            return Some(idx);
        }

        let fallback = self
            .descriptors
            .iter()
            .position(|d| d.kind == AgentKind::CasualAgent)
            .unwrap_or(0);
        tracing::warn!(
            query_len = query.len(),
            agent = %self.descriptors[fallback].name,
            "router fallback to casual agent"
        );
        Some(fallback)
    }

    async fn select_by_embedding(&self, query: &str, lang: &str) -> Option<usize> {
        let embedder = self.embedder.as_ref()?;
        if self.centroids.read().is_empty() {
            return None;
        }

        let query_vec = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, using keyword matching");
                return None;
            }
        };

        let centroids = self.centroids.read();
        let mut best: Option<(usize, f32)> = None;
        for idx in 0..self.descriptors.len() {
            let vector = centroids
                .get(&(idx, lang.to_string()))
                .or_else(|| centroids.get(&(idx, "en".to_string())))?;
            let score = cosine_similarity(&query_vec, vector);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) if score > 0.0 => {
                tracing::debug!(
                    agent = %self.descriptors[idx].name,
                    score,
                    "router selected agent by embedding"
                );
                Some(idx)
            }
            _ => None,
        }
    }

    fn select_by_keywords(&self, query: &str, lang: &str) -> Option<usize> {
        let query_lower = query.to_lowercase();
        let query_tokens = keyword_tokens(query);

        let mut best: Option<(usize, f32)> = None;
        for (idx, descriptor) in self.descriptors.iter().enumerate() {
            let mut score = 0.0f32;
            for example in example_bank(descriptor.kind, lang) {
                let mut example_score = overlap_score(&query_tokens, example);
                let example_lower = example.to_lowercase();
                if example_lower.len() >= 4 && query_lower.contains(&example_lower) {
                    example_score += 2.0;
                }
                score = score.max(example_score);
            }
            score += 0.25 * overlap_score(&query_tokens, &descriptor.description);

            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((idx, score));
            }
        }

        best.map(|(idx, score)| {
            tracing::debug!(
                agent = %self.descriptors[idx].name,
                score,
                "router selected agent by keywords"
            );
            idx
        })
    }
}

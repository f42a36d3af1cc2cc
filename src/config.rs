//! Settings surface for the orchestrator.
//!
//! Configuration comes from an ini-style file with two sections:
//!
//! ```ini
//! [MAIN]
//! agent_name = Nova
//! provider_name = ollama
//! provider_model = deepseek-r1:14b
//! provider_server_address = 127.0.0.1:11434
//! is_local = true
//! jarvis_personality = false
//! speak = false
//! listen = false
//! recover_last_session = false
//! languages = en zh
//!
//! [BROWSER]
//! headless_browser = true
//! stealth_mode = false
//! ```
//!
//! Environment variables carry secrets and deployment endpoints:
//!
//! - `<PROVIDER>_API_KEY`: API key for cloud providers
//! - `DOCKER_INTERNAL_URL`: localhost rewrite when the provider runs in a
//!   sibling container
//! - `DOCSTORE_URL` / `DOCSTORE_API_KEY`: document store backing the memory
//! - `EMBEDDING_URL` / `EMBEDDING_MODEL`: sentence encoder for the router
//! - `SUMMARIZER_URL`: hosted compression model
//!
//! Inside Docker (detected via `/.dockerenv` or the init cgroup) the browser
//! is forced headless regardless of `[BROWSER] headless_browser`.

use std::env;
use std::path::Path;

use config::{Config, File, FileFormat};

use crate::error::{Error, Result};

// ============================================================================
// SETTINGS
// ============================================================================

/// `[MAIN]` section.
#[derive(Debug, Clone)]
pub struct MainSettings {
    /// User-facing name of the casual agent.
    pub agent_name: String,
    /// Provider backend tag: `openai`, `ollama`, `test`, ...
    pub provider_name: String,
    pub provider_model: String,
    pub provider_server_address: String,
    pub is_local: bool,
    /// Selects the `jarvis` role-prompt folder instead of `base`.
    pub jarvis_personality: bool,
    pub speak: bool,
    pub listen: bool,
    pub recover_last_session: bool,
    /// Space-separated in the file; first entry is the primary language.
    pub languages: Vec<String>,
}

/// `[BROWSER]` section.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless_browser: bool,
    pub stealth_mode: bool,
}

/// Full settings surface.
#[derive(Debug, Clone)]
pub struct Settings {
    pub main: MainSettings,
    pub browser: BrowserSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            main: MainSettings {
                agent_name: "Nova".to_string(),
                provider_name: "test".to_string(),
                provider_model: "deepseek-r1:14b".to_string(),
                provider_server_address: "127.0.0.1:11434".to_string(),
                is_local: true,
                jarvis_personality: false,
                speak: false,
                listen: false,
                recover_last_session: false,
                languages: vec!["en".to_string(), "zh".to_string()],
            },
            browser: BrowserSettings {
                headless_browser: true,
                stealth_mode: false,
            },
        }
    }
}

impl Settings {
    /// Load settings from an ini file.
    ///
    /// Every key is required; a missing key or unreadable file is a
    /// configuration error (fatal at startup).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cfg = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| Error::config("settings path is not valid UTF-8"))?,
                FileFormat::Ini,
            ))
            .build()
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;

        let get = |key: &str| -> Result<String> {
            cfg.get_string(key)
                .map_err(|e| Error::config(format!("missing setting '{key}': {e}")))
        };

        let languages: Vec<String> = get("MAIN.languages")?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if languages.is_empty() {
            return Err(Error::config("MAIN.languages must list at least one language"));
        }

        Ok(Self {
            main: MainSettings {
                agent_name: get("MAIN.agent_name")?,
                provider_name: get("MAIN.provider_name")?,
                provider_model: get("MAIN.provider_model")?,
                provider_server_address: get("MAIN.provider_server_address")?,
                is_local: parse_bool("MAIN.is_local", &get("MAIN.is_local")?)?,
                jarvis_personality: parse_bool(
                    "MAIN.jarvis_personality",
                    &get("MAIN.jarvis_personality")?,
                )?,
                speak: parse_bool("MAIN.speak", &get("MAIN.speak")?)?,
                listen: parse_bool("MAIN.listen", &get("MAIN.listen")?)?,
                recover_last_session: parse_bool(
                    "MAIN.recover_last_session",
                    &get("MAIN.recover_last_session")?,
                )?,
                languages,
            },
            browser: BrowserSettings {
                headless_browser: parse_bool(
                    "BROWSER.headless_browser",
                    &get("BROWSER.headless_browser")?,
                )?,
                stealth_mode: parse_bool("BROWSER.stealth_mode", &get("BROWSER.stealth_mode")?)?,
            },
        })
    }

    /// Headless flag with the Docker override applied.
    pub fn effective_headless(&self) -> bool {
        if is_running_in_docker() && !self.browser.headless_browser {
            tracing::warn!("Docker environment detected - forcing headless_browser=true");
            return true;
        }
        self.browser.headless_browser
    }

    /// Primary (first configured) language.
    pub fn primary_language(&self) -> &str {
        self.main
            .languages
            .first()
            .map(String::as_str)
            .unwrap_or("en")
    }
}

/// Accepts the usual ini boolean spellings.
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(Error::config(format!(
            "setting '{key}' is not a boolean: '{other}'"
        ))),
    }
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Resolve `<PROVIDER>_API_KEY` for a cloud provider.
pub fn env_api_key(provider: &str) -> Result<String> {
    let var = format!("{}_API_KEY", provider.to_uppercase());
    env::var(&var).map_err(|_| Error::config(format!("API key {var} not found in environment")))
}

/// `DOCKER_INTERNAL_URL` override for reaching a host-side provider from a
/// container. `None` when running on the host.
pub fn docker_internal_url() -> Option<String> {
    env::var("DOCKER_INTERNAL_URL").ok()
}

/// Document-store endpoint, when one is deployed.
pub fn docstore_url() -> Option<String> {
    env::var("DOCSTORE_URL").ok()
}

/// Document-store API key.
pub fn docstore_api_key() -> Option<String> {
    env::var("DOCSTORE_API_KEY").ok()
}

/// Sentence-encoder endpoint for the router.
pub fn embedding_url() -> Option<String> {
    env::var("EMBEDDING_URL").ok()
}

/// Sentence-encoder model name.
pub fn embedding_model() -> Option<String> {
    env::var("EMBEDDING_MODEL").ok()
}

/// Hosted summarization model endpoint.
pub fn summarizer_url() -> Option<String> {
    env::var("SUMMARIZER_URL").ok()
}

// ============================================================================
// DOCKER DETECTION
// ============================================================================

/// Detect whether the process runs inside a Docker container.
pub fn is_running_in_docker() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    match std::fs::read_to_string("/proc/1/cgroup") {
        Ok(contents) => contents.contains("docker"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_bool_spellings() {
        assert!(parse_bool("k", "True").unwrap());
        assert!(parse_bool("k", "1").unwrap());
        assert!(parse_bool("k", "yes").unwrap());
        assert!(!parse_bool("k", "False").unwrap());
        assert!(!parse_bool("k", "off").unwrap());
        assert!(parse_bool("k", "maybe").is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.main.provider_name, "test");
        assert_eq!(settings.primary_language(), "en");
        assert_eq!(settings.main.languages, vec!["en", "zh"]);
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("polyagent-settings-{}.ini", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[MAIN]\n\
             agent_name = Nova\n\
             provider_name = ollama\n\
             provider_model = deepseek-r1:14b\n\
             provider_server_address = 127.0.0.1:11434\n\
             is_local = true\n\
             jarvis_personality = false\n\
             speak = false\n\
             listen = false\n\
             recover_last_session = true\n\
             languages = en zh fr\n\
             \n\
             [BROWSER]\n\
             headless_browser = true\n\
             stealth_mode = false"
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.main.agent_name, "Nova");
        assert_eq!(settings.main.provider_name, "ollama");
        assert!(settings.main.recover_last_session);
        assert_eq!(settings.main.languages.len(), 3);
        assert!(settings.browser.headless_browser);
    }

    #[test]
    fn test_from_file_missing_is_config_error() {
        let err = Settings::from_file("/nonexistent/polyagent.ini").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_api_key_missing() {
        let err = env_api_key("definitely_not_set_provider").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Per-session browser handle.
//!
//! The headless browser itself is an external collaborator; this module
//! holds the session-side contract: acquire a driver on a chosen high port,
//! hand agents a shared [`Browser`], and guarantee the driver quits exactly
//! once on teardown.
//!
//! [`WebDriverLauncher`] talks the W3C WebDriver wire protocol over reqwest
//! (`POST /session`, `DELETE /session/{id}`) against a driver already
//! listening on `127.0.0.1:{port}`. Tests inject their own
//! [`BrowserLauncher`] and [`BrowserDriver`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{Error, Result};

/// Timeout for driver wire calls.
const DRIVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Pick a random high port for a driver, as each session gets its own.
pub fn random_driver_port() -> u16 {
    rand::thread_rng().gen_range(10_000..=65_535)
}

/// Launch-time options for the driver.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub stealth_mode: bool,
    /// Primary UI language, e.g. `en`.
    pub lang: String,
}

/// Acquires a driver for one session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &BrowserOptions, port: u16) -> Result<Browser>;
}

/// A live driver connection.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn quit(&self) -> Result<()>;
}

// ============================================================================
// BROWSER HANDLE
// ============================================================================

/// Shared browser handle for the agents of one session.
///
/// `quit` is idempotent: the driver sees at most one teardown no matter how
/// many handles call it.
pub struct Browser {
    driver: Arc<dyn BrowserDriver>,
    quit_done: AtomicBool,
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("quit_done", &self.quit_done.load(Ordering::SeqCst))
            .finish()
    }
}

impl Browser {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            quit_done: AtomicBool::new(false),
        }
    }

    /// Quit the driver. Only the first call reaches the wire.
    pub async fn quit(&self) -> Result<()> {
        if self.quit_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver.quit().await
    }
}

// ============================================================================
// WEBDRIVER LAUNCHER
// ============================================================================

/// W3C WebDriver launcher against a local driver process.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebDriverLauncher;

impl WebDriverLauncher {
    pub fn new() -> Self {
        Self
    }
}

struct WebDriverSession {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn quit(&self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::resource(format!("driver quit failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::resource(format!(
                "driver quit HTTP {}",
                response.status()
            )));
        }
        tracing::info!(session = %self.session_id, "browser driver quit");
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: &BrowserOptions, port: u16) -> Result<Browser> {
        let http = reqwest::Client::builder()
            .timeout(DRIVER_TIMEOUT)
            .build()
            .map_err(|e| Error::resource(format!("driver client build failed: {e}")))?;

        let mut args = vec![format!("--lang={}", options.lang)];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        if options.stealth_mode {
            args.push("--disable-blink-features=AutomationControlled".to_string());
        }

        let capabilities = serde_json::json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let base_url = format!("http://127.0.0.1:{port}");
        let response = http
            .post(format!("{base_url}/session"))
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| Error::resource(format!("driver on port {port} unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::resource(format!(
                "driver session create HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::resource(format!("driver session response invalid: {e}")))?;
        let session_id = body
            .pointer("/value/sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::resource("driver session response missing sessionId"))?
            .to_string();

        tracing::info!(port, session = %session_id, "browser driver acquired");

        Ok(Browser::new(Arc::new(WebDriverSession {
            http,
            base_url,
            session_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingDriver {
        quits: AtomicUsize,
    }

    #[async_trait]
    impl BrowserDriver for Arc<CountingDriver> {
        async fn quit(&self) -> Result<()> {
            self.quits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_random_driver_port_in_range() {
        for _ in 0..100 {
            let port = random_driver_port();
            assert!(port >= 10_000);
        }
    }

    #[tokio::test]
    async fn test_quit_reaches_driver_once() {
        let driver = Arc::new(CountingDriver {
            quits: AtomicUsize::new(0),
        });
        let browser = Browser::new(Arc::new(driver.clone()));

        browser.quit().await.unwrap();
        browser.quit().await.unwrap();
        browser.quit().await.unwrap();

        assert_eq!(driver.quits.load(Ordering::SeqCst), 1);
    }
}

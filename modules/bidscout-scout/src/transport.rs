use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use bidscout_common::{AuditSink, CrawlConfig, FetchAttempt, ScrapeError};
use renderer_client::{RenderOptions, RendererClient};

use crate::politeness::PolitenessEngine;

// --- Request/response shapes ---

/// Which execution backend a strategy wants for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Plain HTTP client. API, export, and static-HTML strategies.
    Http,
    /// Headless render service. JS-rendered listings.
    Renderer,
    /// Local browser process. Last resort.
    Browser,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// GET when absent, POST with this JSON body when present.
    pub payload: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload: None,
        }
    }

    pub fn post_json(url: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub http_status: Option<u16>,
    pub body: String,
}

/// One request execution path. The transport drives retries, politeness,
/// and auditing around implementations of this trait.
#[async_trait]
pub trait RequestBackend: Send + Sync {
    async fn execute(
        &self,
        req: &FetchRequest,
        user_agent: &str,
    ) -> Result<BackendResponse, ScrapeError>;
    fn name(&self) -> &'static str;
}

// --- Plain HTTP backend ---

pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl RequestBackend for HttpBackend {
    async fn execute(
        &self,
        req: &FetchRequest,
        user_agent: &str,
    ) -> Result<BackendResponse, ScrapeError> {
        let builder = match &req.payload {
            Some(payload) => self.client.post(&req.url).json(payload),
            None => self.client.get(&req.url),
        };

        let resp = builder
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status().as_u16();
        if let Some(err) = ScrapeError::from_status(status, &req.url) {
            return Err(err);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ScrapeError::Transient(format!("body read failed: {e}")))?;

        Ok(BackendResponse {
            http_status: Some(status),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ScrapeError {
    if err.is_builder() {
        ScrapeError::Permanent {
            status: None,
            message: format!("malformed request: {err}"),
        }
    } else {
        // Timeouts, connection resets, DNS failures: all worth a retry.
        ScrapeError::Transient(err.to_string())
    }
}

// --- Render-service backend ---

pub struct RendererBackend {
    client: RendererClient,
}

impl RendererBackend {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        Self {
            client: RendererClient::new(base_url, token, timeout),
        }
    }

    pub async fn healthy(&self) -> bool {
        self.client.healthy().await
    }
}

#[async_trait]
impl RequestBackend for RendererBackend {
    async fn execute(
        &self,
        req: &FetchRequest,
        _user_agent: &str,
    ) -> Result<BackendResponse, ScrapeError> {
        let html = self
            .client
            .content(&req.url, &RenderOptions::default())
            .await
            .map_err(|e| {
                if e.is_transient() {
                    ScrapeError::Transient(e.to_string())
                } else {
                    ScrapeError::Automation(e.to_string())
                }
            })?;

        Ok(BackendResponse {
            http_status: None,
            body: html,
        })
    }

    fn name(&self) -> &'static str {
        "renderer"
    }
}

// --- Local browser backend ---

/// Runs headless Chromium with `--dump-dom`. Each instance is heavy (~100MB+
/// RSS, several child processes), so concurrent launches go through a
/// bounded semaphore rather than spawning freely.
pub struct ChromeBackend {
    chrome_bin: String,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl ChromeBackend {
    pub fn new(chrome_bin: Option<&str>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            chrome_bin: chrome_bin.unwrap_or("chromium").to_string(),
            pool: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Whether the configured binary exists on PATH or as an absolute path.
    pub fn binary_present(&self) -> bool {
        if self.chrome_bin.contains('/') {
            return std::path::Path::new(&self.chrome_bin).exists();
        }
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(&self.chrome_bin).exists())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl RequestBackend for ChromeBackend {
    async fn execute(
        &self,
        req: &FetchRequest,
        user_agent: &str,
    ) -> Result<BackendResponse, ScrapeError> {
        let parsed = url::Url::parse(&req.url).map_err(|e| ScrapeError::Permanent {
            status: None,
            message: format!("invalid URL {}: {e}", req.url),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ScrapeError::Permanent {
                status: None,
                message: format!("only http/https URLs allowed, got {}", parsed.scheme()),
            });
        }

        // Scoped checkout: the permit is released on every exit path,
        // including cancellation at the await points below.
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| ScrapeError::Automation("browser pool closed".to_string()))?;

        let tmp_dir = tempfile::tempdir()
            .map_err(|e| ScrapeError::Automation(format!("temp profile dir: {e}")))?;

        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.chrome_bin)
                .args([
                    "--headless",
                    "--no-sandbox",
                    "--disable-gpu",
                    "--disable-dev-shm-usage",
                    &format!("--user-agent={user_agent}"),
                    &format!("--user-data-dir={}", tmp_dir.path().display()),
                    "--dump-dom",
                    &req.url,
                ])
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                if output.status.success() {
                    return Ok(BackendResponse {
                        http_status: None,
                        body: String::from_utf8_lossy(&output.stdout).into_owned(),
                    });
                }
                let stderr = String::from_utf8_lossy(&output.stderr);
                // Fork/resource exhaustion clears up on its own; let the
                // transport's retry loop handle it.
                if stderr.contains("Cannot fork")
                    || stderr.contains("Resource temporarily unavailable")
                {
                    Err(ScrapeError::Transient(format!(
                        "browser resource exhaustion: {stderr}"
                    )))
                } else {
                    Err(ScrapeError::Automation(format!(
                        "browser exited with error: {stderr}"
                    )))
                }
            }
            Ok(Err(e)) => {
                let msg = e.to_string();
                if msg.contains("Cannot fork") || msg.contains("Resource temporarily unavailable")
                {
                    Err(ScrapeError::Transient(format!("browser launch: {msg}")))
                } else {
                    Err(ScrapeError::Automation(format!(
                        "failed to launch browser: {msg}"
                    )))
                }
            }
            Err(_) => Err(ScrapeError::Transient(format!(
                "browser timed out after {:?} for {}",
                self.timeout, req.url
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "chrome"
    }
}

// --- User-agent rotation ---

/// Cycles a fixed pool of agent strings per request. Rotation order is not
/// deterministic under concurrency and does not need to be.
pub struct UserAgentPool {
    agents: Vec<String>,
    index: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        assert!(!agents.is_empty(), "user agent pool may not be empty");
        Self {
            agents,
            index: AtomicUsize::new(0),
        }
    }

    pub fn next(&self) -> &str {
        let i = self.index.fetch_add(1, Ordering::Relaxed);
        &self.agents[i % self.agents.len()]
    }
}

// --- Transport ---

/// Pluggable request execution with politeness, retry/backoff, user-agent
/// rotation, and per-attempt auditing.
pub struct Transport {
    politeness: Arc<PolitenessEngine>,
    audit: Arc<dyn AuditSink>,
    agents: UserAgentPool,
    http: Arc<dyn RequestBackend>,
    renderer: Option<Arc<dyn RequestBackend>>,
    browser: Option<Arc<dyn RequestBackend>>,
    max_retries: u32,
    retry_base_delay: Duration,
    respect_robots: bool,
}

impl Transport {
    /// Build the production transport from config: reqwest backend always,
    /// render-service and local-browser backends when configured. The render
    /// service is probed once here; a configured but unresponsive service is
    /// disabled so the rendered-DOM strategy does not burn a chain slot on
    /// every run.
    pub async fn from_config(
        config: &CrawlConfig,
        politeness: Arc<PolitenessEngine>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let renderer = match config.renderer_base_url.as_deref() {
            Some(base) => {
                let backend =
                    RendererBackend::new(base, config.renderer_token.as_deref(), timeout);
                if backend.healthy().await {
                    Some(Arc::new(backend) as Arc<dyn RequestBackend>)
                } else {
                    warn!(
                        base_url = base,
                        "render service configured but not responding, disabling"
                    );
                    None
                }
            }
            None => None,
        };
        let chrome = ChromeBackend::new(
            config.chrome_bin.as_deref(),
            config.max_concurrent_browsers,
            timeout,
        );
        let browser = if chrome.binary_present() {
            Some(Arc::new(chrome) as Arc<dyn RequestBackend>)
        } else {
            None
        };

        Self {
            politeness,
            audit,
            agents: UserAgentPool::new(config.user_agent_pool.clone()),
            http: Arc::new(HttpBackend::new(timeout)),
            renderer,
            browser,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs_f64(config.retry_base_delay_secs),
            respect_robots: config.respect_robots_txt,
        }
    }

    /// Transport with explicit backends. Tests inject fakes here.
    pub fn with_backends(
        config: &CrawlConfig,
        politeness: Arc<PolitenessEngine>,
        audit: Arc<dyn AuditSink>,
        http: Arc<dyn RequestBackend>,
        renderer: Option<Arc<dyn RequestBackend>>,
        browser: Option<Arc<dyn RequestBackend>>,
    ) -> Self {
        Self {
            politeness,
            audit,
            agents: UserAgentPool::new(config.user_agent_pool.clone()),
            http,
            renderer,
            browser,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs_f64(config.retry_base_delay_secs),
            respect_robots: config.respect_robots_txt,
        }
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub fn politeness(&self) -> &Arc<PolitenessEngine> {
        &self.politeness
    }

    fn backend(&self, backend: Backend) -> Result<&Arc<dyn RequestBackend>, ScrapeError> {
        match backend {
            Backend::Http => Ok(&self.http),
            Backend::Renderer => self.renderer.as_ref().ok_or_else(|| {
                ScrapeError::Automation("render service not configured".to_string())
            }),
            Backend::Browser => self
                .browser
                .as_ref()
                .ok_or_else(|| ScrapeError::Automation("browser backend not available".to_string())),
        }
    }

    /// Execute one logical fetch: robots check, politeness wait, then the
    /// backend, retrying transient failures with exponential backoff. Every
    /// physical attempt (each retry separately) produces one audit record;
    /// audit failures never abort the fetch.
    pub async fn fetch(
        &self,
        req: &FetchRequest,
        backend: Backend,
        strategy: &str,
    ) -> Result<BackendResponse, ScrapeError> {
        let executor = self.backend(backend)?;

        for attempt in 0..=self.max_retries {
            if !self.politeness.allowed(&req.url).await {
                self.audit.record(FetchAttempt {
                    url: req.url.clone(),
                    strategy: strategy.to_string(),
                    started_at: Utc::now(),
                    http_status: None,
                    latency_ms: 0,
                    succeeded: false,
                    error_kind: Some("robots_disallowed".to_string()),
                    robots_txt_respected: self.respect_robots,
                    applied_delay_secs: 0.0,
                });
                return Err(ScrapeError::RobotsDisallowed(req.url.clone()));
            }

            let applied_delay = self.politeness.await_turn(&req.url).await;

            let started_at = Utc::now();
            let t0 = tokio::time::Instant::now();
            let user_agent = self.agents.next();
            let result = executor.execute(req, user_agent).await;
            let latency_ms = t0.elapsed().as_millis() as u64;

            let (http_status, error_kind) = match &result {
                Ok(resp) => (resp.http_status, None),
                Err(e) => (
                    match e {
                        ScrapeError::Permanent { status, .. } => *status,
                        _ => None,
                    },
                    Some(e.kind().to_string()),
                ),
            };
            self.audit.record(FetchAttempt {
                url: req.url.clone(),
                strategy: strategy.to_string(),
                started_at,
                http_status,
                latency_ms,
                succeeded: result.is_ok(),
                error_kind,
                robots_txt_respected: self.respect_robots,
                applied_delay_secs: applied_delay,
            });

            match result {
                Ok(resp) => {
                    debug!(
                        url = req.url.as_str(),
                        backend = executor.name(),
                        bytes = resp.body.len(),
                        "fetch succeeded"
                    );
                    return Ok(resp);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.retry_base_delay * 2u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                    warn!(
                        url = req.url.as_str(),
                        backend = executor.name(),
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs_f64(),
                        error = %e,
                        "transient fetch failure, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::politeness::RobotsFetcher;
    use anyhow::Result as AnyResult;
    use bidscout_common::MemoryAuditSink;
    use std::sync::Mutex;

    struct NoRobots;

    #[async_trait]
    impl RobotsFetcher for NoRobots {
        async fn fetch(&self, _domain: &str) -> AnyResult<String> {
            anyhow::bail!("unreachable")
        }
    }

    struct DenyAllRobots;

    #[async_trait]
    impl RobotsFetcher for DenyAllRobots {
        async fn fetch(&self, _domain: &str) -> AnyResult<String> {
            Ok("User-agent: *\nDisallow: /\n".to_string())
        }
    }

    /// Backend that fails with the given error until `succeed_after`
    /// attempts have happened, recording the instant of each call.
    struct ScriptedBackend {
        calls: Mutex<Vec<tokio::time::Instant>>,
        succeed_after: usize,
        transient: bool,
    }

    impl ScriptedBackend {
        fn failing(transient: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                succeed_after: usize::MAX,
                transient,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_instants(&self) -> Vec<tokio::time::Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestBackend for ScriptedBackend {
        async fn execute(
            &self,
            req: &FetchRequest,
            _user_agent: &str,
        ) -> Result<BackendResponse, ScrapeError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(tokio::time::Instant::now());
                calls.len()
            };
            if count > self.succeed_after {
                Ok(BackendResponse {
                    http_status: Some(200),
                    body: "ok".to_string(),
                })
            } else if self.transient {
                Err(ScrapeError::Transient(format!("flaky: {}", req.url)))
            } else {
                Err(ScrapeError::Permanent {
                    status: Some(404),
                    message: "not found".to_string(),
                })
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fast_config() -> CrawlConfig {
        let mut config = CrawlConfig::default();
        config.request_delay_secs = 0.0;
        config.off_peak_start = "00:00".into();
        config.off_peak_end = "00:00".into();
        config
    }

    fn transport_with(
        backend: Arc<ScriptedBackend>,
        fetcher: Arc<dyn RobotsFetcher>,
        audit: Arc<MemoryAuditSink>,
    ) -> Transport {
        let config = fast_config();
        let politeness = Arc::new(PolitenessEngine::new(config.clone(), fetcher));
        Transport::with_backends(&config, politeness, audit, backend, None, None)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retried_with_increasing_backoff() {
        let backend = Arc::new(ScriptedBackend::failing(true));
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = transport_with(backend.clone(), Arc::new(NoRobots), audit.clone());

        let req = FetchRequest::get("https://x.example/list");
        let err = transport.fetch(&req, Backend::Http, "test").await.unwrap_err();
        assert!(err.is_transient());

        // Initial attempt plus max_retries.
        assert_eq!(backend.call_count(), 4);
        assert_eq!(audit.len(), 4);
        assert!(audit.attempts().iter().all(|a| !a.succeeded));

        // Backoff gaps strictly increase (1s, 2s, 4s base plus jitter).
        let instants = backend.call_instants();
        let gaps: Vec<Duration> = instants.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] >= Duration::from_secs(1));
        assert!(gaps[1] > gaps[0]);
        assert!(gaps[2] > gaps[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_stops_retrying() {
        let backend = Arc::new(ScriptedBackend {
            calls: Mutex::new(Vec::new()),
            succeed_after: 2,
            transient: true,
        });
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = transport_with(backend.clone(), Arc::new(NoRobots), audit.clone());

        let req = FetchRequest::get("https://x.example/list");
        let resp = transport.fetch(&req, Backend::Http, "test").await.unwrap();
        assert_eq!(resp.body, "ok");
        assert_eq!(backend.call_count(), 3);
        let attempts = audit.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.last().unwrap().succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::failing(false));
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = transport_with(backend.clone(), Arc::new(NoRobots), audit.clone());

        let req = FetchRequest::get("https://x.example/missing");
        let err = transport.fetch(&req, Backend::Http, "test").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Permanent { .. }));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(audit.attempts()[0].http_status, Some(404));
    }

    #[tokio::test]
    async fn robots_disallowed_aborts_before_any_request() {
        let backend = Arc::new(ScriptedBackend::failing(true));
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = transport_with(backend.clone(), Arc::new(DenyAllRobots), audit.clone());

        let req = FetchRequest::get("https://x.example/private");
        let err = transport.fetch(&req, Backend::Http, "test").await.unwrap_err();
        assert!(matches!(err, ScrapeError::RobotsDisallowed(_)));
        assert_eq!(backend.call_count(), 0);

        let attempts = audit.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("robots_disallowed"));
        assert!(attempts[0].robots_txt_respected);
    }

    #[tokio::test]
    async fn compliance_off_is_recorded_in_the_audit_trail() {
        let mut config = fast_config();
        config.respect_robots_txt = false;
        let backend = Arc::new(ScriptedBackend {
            calls: Mutex::new(Vec::new()),
            succeed_after: 0,
            transient: true,
        });
        let politeness = Arc::new(PolitenessEngine::new(
            config.clone(),
            Arc::new(DenyAllRobots),
        ));
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = Transport::with_backends(
            &config,
            politeness,
            audit.clone(),
            backend.clone(),
            None,
            None,
        );

        // Escape hatch off: the deny-all robots rules are never consulted
        // and the attempt must not be audited as compliant.
        let req = FetchRequest::get("https://x.example/private");
        let resp = transport.fetch(&req, Backend::Http, "test").await.unwrap();
        assert_eq!(resp.body, "ok");
        assert_eq!(backend.call_count(), 1);

        let attempts = audit.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].robots_txt_respected);
    }

    #[tokio::test]
    async fn unreachable_render_service_is_disabled_at_construction() {
        let mut config = fast_config();
        config.renderer_base_url = Some("http://127.0.0.1:1".to_string());
        let politeness = Arc::new(PolitenessEngine::new(config.clone(), Arc::new(NoRobots)));
        let transport =
            Transport::from_config(&config, politeness, Arc::new(MemoryAuditSink::new())).await;
        assert!(!transport.has_renderer());
    }

    #[tokio::test]
    async fn unconfigured_backend_is_an_automation_error() {
        let backend = Arc::new(ScriptedBackend::failing(true));
        let audit = Arc::new(MemoryAuditSink::new());
        let transport = transport_with(backend, Arc::new(NoRobots), audit.clone());

        let req = FetchRequest::get("https://x.example/");
        let err = transport
            .fetch(&req, Backend::Renderer, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Automation(_)));
        assert!(audit.is_empty());
    }

    #[test]
    fn user_agents_cycle() {
        let pool = UserAgentPool::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(pool.next(), "a");
        assert_eq!(pool.next(), "b");
        assert_eq!(pool.next(), "c");
        assert_eq!(pool.next(), "a");
    }
}

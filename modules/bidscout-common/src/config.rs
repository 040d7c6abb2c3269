use std::env;

/// Crawl configuration loaded from environment variables.
///
/// Defaults are deliberately conservative: 3 seconds between requests to the
/// same domain, robots.txt respected, at most two concurrent browser
/// processes.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Declared crawl agent. Always the agent evaluated against robots.txt,
    /// whichever string from the rotation pool a request actually sends.
    pub declared_user_agent: String,
    /// Pool of agent strings cycled per request. Always includes the
    /// declared agent.
    pub user_agent_pool: Vec<String>,
    /// Minimum seconds between two requests to the same domain.
    pub request_delay_secs: f64,
    /// Hard per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum retries after the initial attempt for transient failures.
    pub max_retries: u32,
    /// Base backoff delay; actual delay is base * 2^attempt plus jitter.
    pub retry_base_delay_secs: f64,
    /// Config escape hatch. On by policy; off skips robots.txt checks.
    pub respect_robots_txt: bool,
    /// Daily window during which the per-domain interval is halved.
    /// May wrap midnight ("23:00" to "06:00").
    pub off_peak_start: String,
    pub off_peak_end: String,
    /// Cap on concurrent browser processes/pages.
    pub max_concurrent_browsers: usize,
    /// Base URL of the rendering service, if one is deployed.
    pub renderer_base_url: Option<String>,
    pub renderer_token: Option<String>,
    /// Override for the Chromium binary used by the automation fallback.
    pub chrome_bin: Option<String>,
}

const DECLARED_AGENT: &str = "BidscoutBot/1.0 (+https://bidscout.example/bot-info)";

impl CrawlConfig {
    /// Load configuration from `BIDSCOUT_*` environment variables, falling
    /// back to defaults for everything optional.
    pub fn from_env() -> Self {
        let declared = env::var("BIDSCOUT_USER_AGENT").unwrap_or_else(|_| DECLARED_AGENT.to_string());
        Self {
            user_agent_pool: default_agent_pool(&declared),
            declared_user_agent: declared,
            request_delay_secs: env_f64("BIDSCOUT_REQUEST_DELAY_SECS", 3.0),
            timeout_secs: env_u64("BIDSCOUT_TIMEOUT_SECS", 30),
            max_retries: env_u64("BIDSCOUT_MAX_RETRIES", 3) as u32,
            retry_base_delay_secs: env_f64("BIDSCOUT_RETRY_BASE_DELAY_SECS", 1.0),
            respect_robots_txt: env::var("BIDSCOUT_RESPECT_ROBOTS_TXT")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "off"))
                .unwrap_or(true),
            off_peak_start: env::var("BIDSCOUT_OFF_PEAK_START").unwrap_or_else(|_| "23:00".into()),
            off_peak_end: env::var("BIDSCOUT_OFF_PEAK_END").unwrap_or_else(|_| "06:00".into()),
            max_concurrent_browsers: env_u64("BIDSCOUT_MAX_BROWSERS", 2) as usize,
            renderer_base_url: env::var("BIDSCOUT_RENDERER_URL").ok().filter(|s| !s.is_empty()),
            renderer_token: env::var("BIDSCOUT_RENDERER_TOKEN").ok().filter(|s| !s.is_empty()),
            chrome_bin: env::var("CHROME_BIN").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Log the effective config at startup without dumping secrets.
    pub fn log_redacted(&self) {
        tracing::info!(
            user_agent = self.declared_user_agent.as_str(),
            request_delay_secs = self.request_delay_secs,
            timeout_secs = self.timeout_secs,
            max_retries = self.max_retries,
            respect_robots_txt = self.respect_robots_txt,
            off_peak = format!("{}-{}", self.off_peak_start, self.off_peak_end).as_str(),
            max_concurrent_browsers = self.max_concurrent_browsers,
            renderer_configured = self.renderer_base_url.is_some(),
            "Crawl configuration loaded"
        );
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let declared = DECLARED_AGENT.to_string();
        Self {
            user_agent_pool: default_agent_pool(&declared),
            declared_user_agent: declared,
            request_delay_secs: 3.0,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_secs: 1.0,
            respect_robots_txt: true,
            off_peak_start: "23:00".into(),
            off_peak_end: "06:00".into(),
            max_concurrent_browsers: 2,
            renderer_base_url: None,
            renderer_token: None,
            chrome_bin: None,
        }
    }
}

/// Browser-like strings reduce fingerprinting correlation; the declared
/// agent stays in the pool so the crawl remains attributable.
fn default_agent_pool(declared: &str) -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        declared.to_string(),
    ]
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

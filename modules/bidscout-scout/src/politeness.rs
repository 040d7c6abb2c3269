use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use texting_robots::Robot;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use bidscout_common::{domain_of, CrawlConfig};

/// Fetches the robots.txt body for a domain. Seam so tests can hand the
/// engine canned rules or an unreachable server.
#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    async fn fetch(&self, domain: &str) -> Result<String>;
}

pub struct HttpRobotsFetcher {
    client: reqwest::Client,
}

impl HttpRobotsFetcher {
    pub fn new(declared_agent: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(declared_agent.to_string())
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl RobotsFetcher for HttpRobotsFetcher {
    async fn fetch(&self, domain: &str) -> Result<String> {
        let url = format!("https://{domain}/robots.txt");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("robots.txt fetch failed for {domain}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("robots.txt returned HTTP {} for {domain}", resp.status());
        }
        resp.text().await.context("robots.txt body read failed")
    }
}

/// Per-domain politeness state. Lives for the process lifetime; never
/// deleted, invalidated manually only.
struct DomainPoliteness {
    /// None = not fetched yet. Some(None) = unreachable or unparseable,
    /// cached as "unknown, assume allowed".
    robots: Option<Option<Robot>>,
    /// Issue slot granted to the most recent caller. The next request may
    /// not be issued before this plus the required interval.
    last_slot: Option<Instant>,
    delay_override_secs: Option<f64>,
}

impl DomainPoliteness {
    fn new() -> Self {
        Self {
            robots: None,
            last_slot: None,
            delay_override_secs: None,
        }
    }
}

/// Robots.txt compliance cache and per-domain request pacing.
///
/// Explicitly constructed and injected into the transport layer; the
/// per-domain state is shared by every concurrent caller and serialized
/// through a per-domain mutex so two racing callers can never both compute
/// a zero delay.
pub struct PolitenessEngine {
    config: CrawlConfig,
    fetcher: Arc<dyn RobotsFetcher>,
    /// Wall-clock seam for the off-peak window check.
    now_local: fn() -> NaiveTime,
    domains: Mutex<HashMap<String, Arc<Mutex<DomainPoliteness>>>>,
}

fn local_time_of_day() -> NaiveTime {
    Local::now().time()
}

impl PolitenessEngine {
    pub fn new(config: CrawlConfig, fetcher: Arc<dyn RobotsFetcher>) -> Self {
        Self {
            config,
            fetcher,
            now_local: local_time_of_day,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the wall-clock source. Tests pin the time of day to exercise
    /// the off-peak branch deterministically.
    pub fn with_time_source(mut self, now_local: fn() -> NaiveTime) -> Self {
        self.now_local = now_local;
        self
    }

    /// Engine with the default HTTPS robots.txt fetcher using the declared
    /// crawl agent.
    pub fn with_http_fetcher(config: CrawlConfig) -> Self {
        let fetcher = Arc::new(HttpRobotsFetcher::new(
            &config.declared_user_agent,
            Duration::from_secs(config.timeout_secs),
        ));
        Self::new(config, fetcher)
    }

    async fn domain_entry(&self, domain: &str) -> Arc<Mutex<DomainPoliteness>> {
        let mut map = self.domains.lock().await;
        map.entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainPoliteness::new())))
            .clone()
    }

    /// Whether the configured crawl agent may fetch this URL.
    ///
    /// Fetches and caches robots.txt once per domain per process lifetime.
    /// An unreachable or unparseable robots.txt fails open. Evaluation
    /// always uses the declared agent, regardless of which rotated string a
    /// request actually sends.
    pub async fn allowed(&self, url: &str) -> bool {
        if !self.config.respect_robots_txt {
            return true;
        }
        let Some(domain) = domain_of(url) else {
            // Malformed URLs are rejected by the transport with a proper
            // error; robots has nothing to say about them.
            return true;
        };

        let entry = self.domain_entry(&domain).await;
        let mut state = entry.lock().await;

        if state.robots.is_none() {
            state.robots = Some(self.fetch_robots(&domain).await);
        }

        match &state.robots {
            Some(Some(robot)) => robot.allowed(url),
            _ => true,
        }
    }

    async fn fetch_robots(&self, domain: &str) -> Option<Robot> {
        match self.fetcher.fetch(domain).await {
            Ok(body) => {
                match Robot::new(&self.config.declared_user_agent, body.as_bytes()) {
                    Ok(robot) => {
                        debug!(domain, "robots.txt cached");
                        Some(robot)
                    }
                    Err(e) => {
                        warn!(domain, error = %e, "robots.txt unparseable, assuming allowed");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(domain, error = %e, "robots.txt unreachable, assuming allowed");
                None
            }
        }
    }

    /// Wait for this domain's next request slot and claim it. Returns the
    /// delay applied in seconds.
    ///
    /// The slot is claimed under the domain lock before sleeping, so a burst
    /// of concurrent callers each gets its own slot spaced by the required
    /// interval instead of all observing a stale "no wait needed".
    pub async fn await_turn(&self, url: &str) -> f64 {
        let Some(domain) = domain_of(url) else {
            return 0.0;
        };

        let entry = self.domain_entry(&domain).await;
        let now = Instant::now();

        let slot = {
            let mut state = entry.lock().await;
            let interval = self.required_interval(&state);
            let slot = match state.last_slot {
                Some(last) => (last + interval).max(now),
                None => now,
            };
            state.last_slot = Some(slot);
            slot
        };

        // Sleep outside the critical section; later callers only need the
        // updated slot, not the lock, while this one waits.
        if slot > now {
            tokio::time::sleep_until(slot).await;
            let waited = (slot - now).as_secs_f64();
            debug!(domain, waited_secs = waited, "politeness delay applied");
            waited
        } else {
            0.0
        }
    }

    /// Required spacing for a domain right now. Halved inside the configured
    /// off-peak window.
    fn required_interval(&self, state: &DomainPoliteness) -> Duration {
        let base = state
            .delay_override_secs
            .unwrap_or(self.config.request_delay_secs);
        let secs = if self.off_peak_now() { base / 2.0 } else { base };
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn off_peak_now(&self) -> bool {
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&self.config.off_peak_start, "%H:%M"),
            NaiveTime::parse_from_str(&self.config.off_peak_end, "%H:%M"),
        ) else {
            return false;
        };
        is_off_peak((self.now_local)(), start, end)
    }

    /// Override the minimum interval for one domain.
    pub async fn set_domain_delay(&self, domain: &str, delay_secs: f64) {
        let entry = self.domain_entry(domain).await;
        entry.lock().await.delay_override_secs = Some(delay_secs);
    }

    /// Drop the cached robots.txt rules for a domain; the next `allowed`
    /// call refetches.
    pub async fn invalidate_robots(&self, domain: &str) {
        let entry = self.domain_entry(domain).await;
        entry.lock().await.robots = None;
    }
}

/// Whether `now` falls inside the window. The window may wrap midnight
/// (e.g. 23:00-06:00).
pub fn is_off_peak(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start > end {
        now >= start || now <= end
    } else {
        (start..=end).contains(&now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRobots(String);

    #[async_trait]
    impl RobotsFetcher for StaticRobots {
        async fn fetch(&self, _domain: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct UnreachableRobots;

    #[async_trait]
    impl RobotsFetcher for UnreachableRobots {
        async fn fetch(&self, domain: &str) -> Result<String> {
            anyhow::bail!("connection refused for {domain}")
        }
    }

    struct CountingRobots(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl RobotsFetcher for CountingRobots {
        async fn fetch(&self, _domain: &str) -> Result<String> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("User-agent: *\nAllow: /".to_string())
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig::default()
    }

    fn engine(fetcher: Arc<dyn RobotsFetcher>) -> PolitenessEngine {
        PolitenessEngine::new(config(), fetcher)
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[tokio::test]
    async fn disallowed_path_is_blocked() {
        let rules = "User-agent: *\nDisallow: /private\n";
        let engine = engine(Arc::new(StaticRobots(rules.to_string())));
        assert!(!engine.allowed("https://x.example/private").await);
        assert!(!engine.allowed("https://x.example/private/page").await);
        assert!(engine.allowed("https://x.example/public").await);
    }

    #[tokio::test]
    async fn unreachable_robots_fails_open() {
        let engine = engine(Arc::new(UnreachableRobots));
        assert!(engine.allowed("https://down.example/anything").await);
    }

    #[tokio::test]
    async fn robots_fetched_once_per_domain() {
        let fetcher = Arc::new(CountingRobots(Default::default()));
        let engine = engine(fetcher.clone());
        for _ in 0..5 {
            assert!(engine.allowed("https://x.example/a").await);
        }
        assert_eq!(fetcher.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_triggers_refetch() {
        let fetcher = Arc::new(CountingRobots(Default::default()));
        let engine = engine(fetcher.clone());
        engine.allowed("https://x.example/a").await;
        engine.invalidate_robots("x.example").await;
        engine.allowed("https://x.example/a").await;
        assert_eq!(fetcher.0.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn compliance_off_skips_robots_entirely() {
        let mut config = CrawlConfig::default();
        config.respect_robots_txt = false;
        let rules = "User-agent: *\nDisallow: /\n";
        let engine =
            PolitenessEngine::new(config, Arc::new(StaticRobots(rules.to_string())));
        assert!(engine.allowed("https://x.example/private").await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_spaced() {
        let mut config = CrawlConfig::default();
        config.request_delay_secs = 2.0;
        // Park the off-peak window so the test is time-of-day independent.
        config.off_peak_start = "00:00".into();
        config.off_peak_end = "00:00".into();
        let engine = Arc::new(PolitenessEngine::new(
            config,
            Arc::new(UnreachableRobots),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.await_turn("https://x.example/list").await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for task in tasks {
            stamps.push(task.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_secs_f64(1.95),
                "requests spaced only {gap:?} apart"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn different_domains_do_not_wait_on_each_other() {
        let engine = engine(Arc::new(UnreachableRobots));
        assert_eq!(engine.await_turn("https://a.example/").await, 0.0);
        assert_eq!(engine.await_turn("https://b.example/").await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn domain_override_changes_spacing() {
        let mut config = CrawlConfig::default();
        config.off_peak_start = "00:00".into();
        config.off_peak_end = "00:00".into();
        let engine = PolitenessEngine::new(config, Arc::new(UnreachableRobots));
        engine.set_domain_delay("slow.example", 10.0).await;

        assert_eq!(engine.await_turn("https://slow.example/").await, 0.0);
        let waited = engine.await_turn("https://slow.example/").await;
        assert!(waited >= 9.9, "waited only {waited}s");
    }

    fn two_am() -> NaiveTime {
        NaiveTime::parse_from_str("02:00", "%H:%M").unwrap()
    }

    fn noon() -> NaiveTime {
        NaiveTime::parse_from_str("12:00", "%H:%M").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn off_peak_window_halves_spacing() {
        let mut config = CrawlConfig::default();
        config.request_delay_secs = 4.0;
        // Default window is 23:00-06:00; pin the clock inside it.
        let engine = PolitenessEngine::new(config, Arc::new(UnreachableRobots))
            .with_time_source(two_am);

        assert_eq!(engine.await_turn("https://x.example/").await, 0.0);
        let waited = engine.await_turn("https://x.example/").await;
        assert!(
            (waited - 2.0).abs() < 0.05,
            "off-peak wait was {waited}s, expected half of 4.0"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn daytime_spacing_uses_the_full_interval() {
        let mut config = CrawlConfig::default();
        config.request_delay_secs = 4.0;
        let engine = PolitenessEngine::new(config, Arc::new(UnreachableRobots))
            .with_time_source(noon);

        assert_eq!(engine.await_turn("https://x.example/").await, 0.0);
        let waited = engine.await_turn("https://x.example/").await;
        assert!(waited >= 3.95, "daytime wait was {waited}s");
    }

    #[test]
    fn off_peak_window_plain() {
        let start = time("01:00");
        let end = time("05:00");
        assert!(is_off_peak(time("03:00"), start, end));
        assert!(!is_off_peak(time("12:00"), start, end));
    }

    #[test]
    fn off_peak_window_wraps_midnight() {
        let start = time("23:00");
        let end = time("06:00");
        assert!(is_off_peak(time("23:30"), start, end));
        assert!(is_off_peak(time("02:00"), start, end));
        assert!(!is_off_peak(time("12:00"), start, end));
    }
}

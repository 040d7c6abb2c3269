use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use bidscout_common::{
    CrawlConfig, OpportunityStore, PortalConfig, RunStatus, ScrapeError, ScrapingProgress,
    ScrapingResult,
};

use crate::politeness::PolitenessEngine;
use crate::portal::PortalScraper;
use crate::strategies;
use crate::transport::Transport;

pub type ProgressCallback = Box<dyn Fn(ScrapingProgress) + Send + Sync>;

type Callbacks = Arc<Mutex<Vec<ProgressCallback>>>;

/// Snapshot of what the orchestrator is doing, for status surfaces.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub configured_portals: Vec<String>,
    pub active_runs: Vec<String>,
}

/// Runs portal scrapers concurrently, multiplexes progress events, and
/// aggregates per-portal results while tolerating individual failures.
///
/// The production constructor also builds the shared `PolitenessEngine` and
/// injects it into the transport; politeness state is never ambient.
pub struct Orchestrator {
    portals: HashMap<String, Arc<PortalScraper>>,
    /// Registration order, so `run_all` output is stable.
    order: Vec<String>,
    store: Arc<dyn OpportunityStore>,
    callbacks: Callbacks,
    active: Mutex<HashMap<String, AbortHandle>>,
}

impl Orchestrator {
    pub fn new(scrapers: Vec<PortalScraper>, store: Arc<dyn OpportunityStore>) -> Self {
        let mut portals = HashMap::new();
        let mut order = Vec::new();
        for scraper in scrapers {
            order.push(scraper.name().to_string());
            portals.insert(scraper.name().to_string(), Arc::new(scraper));
        }
        info!(portals = order.len(), "orchestrator initialized");
        Self {
            portals,
            order,
            store,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring: one shared politeness engine and transport, the
    /// standard strategy chain per portal. Per-portal delay overrides are
    /// registered with the politeness engine up front.
    pub async fn with_standard_portals(
        config: &CrawlConfig,
        portal_configs: Vec<PortalConfig>,
        store: Arc<dyn OpportunityStore>,
        audit: Arc<dyn bidscout_common::AuditSink>,
    ) -> Self {
        let politeness = Arc::new(PolitenessEngine::with_http_fetcher(config.clone()));
        let transport = Arc::new(Transport::from_config(config, politeness, audit).await);
        for portal in &portal_configs {
            if let Some(delay) = portal.delay_override_secs {
                if let Some(domain) = bidscout_common::domain_of(&portal.base_url) {
                    transport.politeness().set_domain_delay(&domain, delay).await;
                }
            }
        }

        let scrapers = portal_configs
            .into_iter()
            .map(|portal| {
                let chain = strategies::standard_chain(&transport);
                PortalScraper::new(portal, chain)
            })
            .collect();

        Self::new(scrapers, store)
    }

    /// Register a progress subscriber. Called synchronously from the run's
    /// task context; a panicking subscriber is isolated at the emit site.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn portal_names(&self) -> &[String] {
        &self.order
    }

    pub fn status(&self) -> OrchestratorStatus {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        OrchestratorStatus {
            configured_portals: self.order.clone(),
            active_runs: active,
        }
    }

    /// Run one portal to completion. Never panics outward: orchestration
    /// bugs, panics inside strategies, and cancellation all come back as a
    /// terminal `ScrapingResult`, and the terminal progress event always
    /// fires.
    pub async fn run_portal(&self, name: &str, limit: usize) -> ScrapingResult {
        let t0 = tokio::time::Instant::now();

        let Some(scraper) = self.portals.get(name).cloned() else {
            let message =
                ScrapeError::Orchestration(format!("no scraper configured for portal '{name}'"))
                    .to_string();
            error!(portal = name, "{message}");
            emit(
                &self.callbacks,
                ScrapingProgress::new(name, RunStatus::Failed, &message),
            );
            return ScrapingResult::failure(name, message, t0.elapsed().as_millis() as u64);
        };

        emit(
            &self.callbacks,
            ScrapingProgress::new(name, RunStatus::Starting, format!("Starting {name} scraper")),
        );

        let callbacks = self.callbacks.clone();
        let store = self.store.clone();
        let portal = name.to_string();

        let handle = tokio::spawn(async move {
            emit(
                &callbacks,
                ScrapingProgress::new(
                    &portal,
                    RunStatus::Running,
                    format!("Scraping {portal} opportunities"),
                )
                .percent(25),
            );

            let output = scraper.run(limit).await;

            emit(
                &callbacks,
                ScrapingProgress::new(
                    &portal,
                    RunStatus::Running,
                    format!("Processing {} records", output.records.len()),
                )
                .percent(75)
                .records(output.records.len() as u32),
            );

            // Persistence is a collaborator; its failure must not fail the
            // acquisition run.
            if let Err(e) = store.store(&portal, &output.records).await {
                warn!(portal = portal.as_str(), error = %e, "store collaborator failed");
            }

            output
        });

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handle.abort_handle());

        let joined = handle.await;

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        let duration_ms = t0.elapsed().as_millis() as u64;

        match joined {
            Ok(output) => {
                let count = output.records.len();
                emit(
                    &self.callbacks,
                    ScrapingProgress::new(
                        name,
                        RunStatus::Completed,
                        format!("Completed: {count} records found"),
                    )
                    .percent(100)
                    .records(count as u32),
                );
                ScrapingResult {
                    portal: name.to_string(),
                    success: true,
                    record_count: count,
                    error_message: None,
                    duration_ms,
                    strategy_used: output.strategy_used,
                    records: output.records,
                }
            }
            Err(e) if e.is_cancelled() => {
                info!(portal = name, "portal run cancelled");
                emit(
                    &self.callbacks,
                    ScrapingProgress::new(name, RunStatus::Cancelled, "Run cancelled"),
                );
                ScrapingResult::failure(name, "run cancelled", duration_ms)
            }
            Err(e) => {
                let message = panic_message(e);
                error!(portal = name, "portal run panicked: {message}");
                emit(
                    &self.callbacks,
                    ScrapingProgress::new(name, RunStatus::Failed, &message),
                );
                ScrapingResult::failure(name, message, duration_ms)
            }
        }
    }

    /// Run every configured portal concurrently. One portal's failure never
    /// cancels its siblings; the output always has exactly one result per
    /// configured portal, in registration order.
    pub async fn run_all(&self, limit_per_portal: usize) -> Vec<ScrapingResult> {
        info!(
            portals = self.order.len(),
            limit_per_portal, "starting concurrent scrape of all portals"
        );

        let runs = self
            .order
            .iter()
            .map(|name| self.run_portal(name, limit_per_portal));
        let results = futures::future::join_all(runs).await;

        let successful = results.iter().filter(|r| r.success).count();
        let total_records: usize = results.iter().map(|r| r.record_count).sum();
        info!(
            successful,
            total = results.len(),
            total_records,
            "concurrent scrape finished"
        );

        results
    }

    /// Cancel one in-flight portal run, or all of them. Observed at the
    /// task's next suspension point (politeness wait, fetch, backoff sleep).
    pub fn cancel(&self, name: Option<&str>) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match name {
            Some(portal) => {
                if let Some(handle) = active.remove(portal) {
                    handle.abort();
                    info!(portal, "cancellation requested");
                }
            }
            None => {
                for (portal, handle) in active.drain() {
                    handle.abort();
                    info!(portal = portal.as_str(), "cancellation requested");
                }
            }
        }
    }
}

fn emit(callbacks: &Callbacks, progress: ScrapingProgress) {
    let guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
    for callback in guard.iter() {
        let event = progress.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!(
                portal = progress.portal.as_str(),
                "progress subscriber panicked"
            );
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            format!("portal run panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("portal run panicked: {s}")
        } else {
            "portal run panicked".to_string()
        }
    } else {
        format!("portal task failed: {err}")
    }
}

use std::sync::Mutex;

use tracing::info;

use bidscout_common::{PortalConfig, RawRecord};

use crate::strategy::StrategyChain;

/// Per-portal fetch/quality statistics surfaced to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub records_found: u32,
    pub last_run_duration_ms: u64,
    pub strategy_used: Option<String>,
}

/// Output of one portal run: records with portal identity attached, plus
/// provenance of the strategy that produced them.
#[derive(Debug, Default)]
pub struct PortalRunOutput {
    pub records: Vec<RawRecord>,
    pub strategy_used: Option<String>,
}

/// One scraper per government portal: a strategy chain bound to that
/// portal's configuration. Normalization and storage happen downstream;
/// this type only acquires, tags, and counts.
pub struct PortalScraper {
    config: PortalConfig,
    chain: StrategyChain,
    stats: Mutex<RunStats>,
}

impl PortalScraper {
    pub fn new(config: PortalConfig, chain: StrategyChain) -> Self {
        Self {
            config,
            chain,
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn stats(&self) -> RunStats {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drive the strategy chain once. Never errors: an exhausted chain is an
    /// empty output, and strategy failures were already absorbed below.
    pub async fn run(&self, limit: usize) -> PortalRunOutput {
        let t0 = tokio::time::Instant::now();
        let outcome = self.chain.acquire(&self.config, limit).await;
        let duration_ms = t0.elapsed().as_millis() as u64;

        let mut records = outcome.records;
        for record in &mut records {
            record.portal = self.config.name.clone();
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.records_found = records.len() as u32;
            stats.last_run_duration_ms = duration_ms;
            stats.strategy_used = outcome.strategy_used.clone();
        }

        info!(
            portal = self.config.name.as_str(),
            records = records.len(),
            duration_ms,
            strategy = outcome.strategy_used.as_deref(),
            "portal run finished"
        );

        PortalRunOutput {
            records,
            strategy_used: outcome.strategy_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::AcquisitionStrategy;
    use async_trait::async_trait;
    use bidscout_common::ScrapeError;
    use std::sync::Arc;

    struct FixedStrategy(usize);

    #[async_trait]
    impl AcquisitionStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn is_available(&self, _portal: &PortalConfig) -> bool {
            true
        }

        async fn execute(
            &self,
            _portal: &PortalConfig,
            _limit: usize,
        ) -> Result<Vec<RawRecord>, ScrapeError> {
            Ok((0..self.0)
                .map(|i| RawRecord::skeleton(format!("r{i}"), format!("id-{i}")))
                .collect())
        }
    }

    fn portal_config() -> PortalConfig {
        PortalConfig {
            name: "esbd".to_string(),
            base_url: "https://esbd.example".to_string(),
            search_url: "https://esbd.example/search".to_string(),
            api: None,
            export: None,
            listing_pattern: "/bid/".to_string(),
            browser_enabled: false,
            delay_override_secs: None,
        }
    }

    #[tokio::test]
    async fn records_carry_portal_identity_and_stats_update() {
        let chain = StrategyChain::new(vec![Arc::new(FixedStrategy(3))]);
        let scraper = PortalScraper::new(portal_config(), chain);

        let output = scraper.run(50).await;
        assert_eq!(output.records.len(), 3);
        assert!(output.records.iter().all(|r| r.portal == "esbd"));
        assert_eq!(output.strategy_used.as_deref(), Some("fixed"));

        let stats = scraper.stats();
        assert_eq!(stats.records_found, 3);
        assert_eq!(stats.strategy_used.as_deref(), Some("fixed"));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use bidscout_common::{PortalConfig, RawRecord, ScrapeError};

/// One way of acquiring records from a portal. Strategies are stateless
/// beyond their own client configuration; ordering lives in the chain.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability check: configuration present, prerequisite service or
    /// binary reachable. Unavailable strategies are skipped, not failed.
    fn is_available(&self, portal: &PortalConfig) -> bool;

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError>;
}

#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub records: Vec<RawRecord>,
    pub strategy_used: Option<String>,
}

/// Ordered list of acquisition strategies, most structured first. Pure data:
/// tests inject fake strategies directly.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn AcquisitionStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn AcquisitionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order and accept the first non-empty result,
    /// tagged with the producing strategy's name.
    ///
    /// Every execution error is absorbed here at warning level: a failing
    /// strategy means "try the next one", never an error for the caller.
    /// An exhausted chain returns an empty outcome: the portal yielded
    /// nothing this run, which is a normal result, not a crash.
    pub async fn acquire(&self, portal: &PortalConfig, limit: usize) -> ChainOutcome {
        for strategy in &self.strategies {
            if !strategy.is_available(portal) {
                debug!(
                    portal = portal.name.as_str(),
                    strategy = strategy.name(),
                    "strategy unavailable, skipping"
                );
                continue;
            }

            match strategy.execute(portal, limit).await {
                Ok(records) if !records.is_empty() => {
                    info!(
                        portal = portal.name.as_str(),
                        strategy = strategy.name(),
                        count = records.len(),
                        "strategy produced records"
                    );
                    let records = records
                        .into_iter()
                        .take(limit)
                        .map(|mut r| {
                            r.source_strategy = strategy.name().to_string();
                            r
                        })
                        .collect();
                    return ChainOutcome {
                        records,
                        strategy_used: Some(strategy.name().to_string()),
                    };
                }
                Ok(_) => {
                    warn!(
                        portal = portal.name.as_str(),
                        strategy = strategy.name(),
                        "strategy returned no records, falling through"
                    );
                }
                Err(e) => {
                    warn!(
                        portal = portal.name.as_str(),
                        strategy = strategy.name(),
                        error_kind = e.kind(),
                        error = %e,
                        "strategy failed, falling through"
                    );
                }
            }
        }

        warn!(
            portal = portal.name.as_str(),
            "all strategies exhausted without records"
        );
        ChainOutcome::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal() -> PortalConfig {
        PortalConfig {
            name: "test-portal".to_string(),
            base_url: "https://portal.example".to_string(),
            search_url: "https://portal.example/search".to_string(),
            api: None,
            export: None,
            listing_pattern: "/bid/".to_string(),
            browser_enabled: false,
            delay_override_secs: None,
        }
    }

    struct FakeStrategy {
        name: &'static str,
        available: bool,
        outcome: Result<usize, &'static str>,
    }

    #[async_trait]
    impl AcquisitionStrategy for FakeStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self, _portal: &PortalConfig) -> bool {
            self.available
        }

        async fn execute(
            &self,
            _portal: &PortalConfig,
            _limit: usize,
        ) -> Result<Vec<RawRecord>, ScrapeError> {
            match self.outcome {
                Ok(n) => Ok((0..n)
                    .map(|i| RawRecord::skeleton(format!("record {i}"), format!("id-{i}")))
                    .collect()),
                Err(msg) => Err(ScrapeError::Parse(msg.to_string())),
            }
        }
    }

    fn fake(
        name: &'static str,
        available: bool,
        outcome: Result<usize, &'static str>,
    ) -> Arc<dyn AcquisitionStrategy> {
        Arc::new(FakeStrategy {
            name,
            available,
            outcome,
        })
    }

    #[tokio::test]
    async fn fallthrough_accepts_first_non_empty() {
        let chain = StrategyChain::new(vec![
            fake("api", true, Err("boom")),
            fake("export", true, Ok(0)),
            fake("html", true, Ok(5)),
        ]);

        let outcome = chain.acquire(&portal(), 50).await;
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.strategy_used.as_deref(), Some("html"));
        assert!(outcome.records.iter().all(|r| r.source_strategy == "html"));
    }

    #[tokio::test]
    async fn unavailable_strategies_are_skipped() {
        let chain = StrategyChain::new(vec![
            fake("api", false, Ok(9)),
            fake("html", true, Ok(2)),
        ]);

        let outcome = chain.acquire(&portal(), 50).await;
        assert_eq!(outcome.strategy_used.as_deref(), Some("html"));
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_yields_empty_outcome() {
        let chain = StrategyChain::new(vec![
            fake("api", true, Err("down")),
            fake("html", true, Ok(0)),
        ]);

        let outcome = chain.acquire(&portal(), 50).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.strategy_used.is_none());
    }

    #[tokio::test]
    async fn limit_caps_accepted_records() {
        let chain = StrategyChain::new(vec![fake("api", true, Ok(20))]);
        let outcome = chain.acquire(&portal(), 7).await;
        assert_eq!(outcome.records.len(), 7);
    }

    #[tokio::test]
    async fn empty_chain_is_a_normal_empty_outcome() {
        let chain = StrategyChain::new(Vec::new());
        let outcome = chain.acquire(&portal(), 50).await;
        assert!(outcome.records.is_empty());
    }
}

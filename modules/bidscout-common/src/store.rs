use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::types::RawRecord;

/// Filters for reading records back out of a store.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub portal: Option<String>,
    pub limit: Option<usize>,
}

/// Persistence collaborator. The acquisition core never issues SQL; it hands
/// records across this boundary and moves on. `query` exists for status
/// surfaces built on top; the core itself only writes.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn store(&self, portal: &str, records: &[RawRecord]) -> Result<usize>;
    async fn query(&self, query: &StoreQuery) -> Result<Vec<RawRecord>>;
}

/// Logs what would have been stored. Default store for dry runs and the CLI.
pub struct LogStore;

#[async_trait]
impl OpportunityStore for LogStore {
    async fn store(&self, portal: &str, records: &[RawRecord]) -> Result<usize> {
        info!(portal, count = records.len(), "Storing opportunity records");
        Ok(records.len())
    }

    async fn query(&self, _query: &StoreQuery) -> Result<Vec<RawRecord>> {
        Ok(Vec::new())
    }
}

/// Accumulates records in memory as a flat list; tests filter by the portal
/// field on each record.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<RawRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RawRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn store(&self, _portal: &str, records: &[RawRecord]) -> Result<usize> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("record buffer poisoned"))?;
        guard.extend_from_slice(records);
        Ok(records.len())
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<RawRecord>> {
        let records = self.records();
        let filtered = records
            .into_iter()
            .filter(|r| {
                query
                    .portal
                    .as_deref()
                    .map(|p| r.portal == p)
                    .unwrap_or(true)
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(portal: &str, title: &str) -> RawRecord {
        let mut record = RawRecord::skeleton(title, title);
        record.portal = portal.to_string();
        record
    }

    #[tokio::test]
    async fn memory_store_queries_by_portal() {
        let store = MemoryStore::new();
        store
            .store("esbd", &[record("esbd", "a"), record("esbd", "b")])
            .await
            .unwrap();
        store.store("houston", &[record("houston", "c")]).await.unwrap();

        let all = store.query(&StoreQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let esbd = store
            .query(&StoreQuery {
                portal: Some("esbd".to_string()),
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(esbd.len(), 1);
        assert_eq!(esbd[0].portal, "esbd");
    }
}

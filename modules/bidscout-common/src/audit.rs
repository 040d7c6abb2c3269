use std::sync::Mutex;

use tracing::{info, warn};

use crate::types::FetchAttempt;

/// Write-only audit sink for fetch attempts. Fire-and-forget: an
/// implementation must never block the caller or propagate an error into
/// the fetch path.
pub trait AuditSink: Send + Sync {
    fn record(&self, attempt: FetchAttempt);
}

/// Emits one structured log line per attempt.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, attempt: FetchAttempt) {
        info!(
            url = attempt.url.as_str(),
            strategy = attempt.strategy.as_str(),
            status = attempt.http_status,
            latency_ms = attempt.latency_ms,
            succeeded = attempt.succeeded,
            error_kind = attempt.error_kind.as_deref(),
            robots_respected = attempt.robots_txt_respected,
            applied_delay_secs = attempt.applied_delay_secs,
            "fetch attempt"
        );
    }
}

/// Buffers attempts in memory. Used by tests and the CLI run summary.
#[derive(Default)]
pub struct MemoryAuditSink {
    attempts: Mutex<Vec<FetchAttempt>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<FetchAttempt> {
        match self.attempts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, attempt: FetchAttempt) {
        match self.attempts.lock() {
            Ok(mut guard) => guard.push(attempt),
            // A poisoned buffer only loses observability, never the fetch.
            Err(_) => warn!("audit buffer poisoned, dropping attempt"),
        }
    }
}

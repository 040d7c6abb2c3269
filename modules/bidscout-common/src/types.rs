use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Acquisition records ---

/// Portal-agnostic bag of fields extracted by an acquisition strategy.
/// Normalization into a persisted Opportunity happens downstream, behind
/// the `OpportunityStore` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Portal identity, attached by the `PortalScraper` that produced it.
    pub portal: String,
    pub title: String,
    pub external_id: String,
    pub issuing_entity: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub document_urls: Vec<String>,
    /// Provenance: name of the strategy that produced this record.
    pub source_strategy: String,
    pub extracted_at: DateTime<Utc>,
}

impl RawRecord {
    /// Skeleton record carrying only a title and external id. Strategies that
    /// work from listing links start here and fill in what they can.
    pub fn skeleton(title: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            portal: String::new(),
            title: title.into(),
            external_id: external_id.into(),
            issuing_entity: None,
            posted_at: None,
            due_at: None,
            description: None,
            document_urls: Vec::new(),
            source_strategy: String::new(),
            extracted_at: Utc::now(),
        }
    }
}

// --- Audit trail ---

/// Record of one physical request, including each retry separately.
/// Immutable once created; forwarded to the audit sink collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub url: String,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub succeeded: bool,
    pub error_kind: Option<String>,
    pub robots_txt_respected: bool,
    pub applied_delay_secs: f64,
}

// --- Run progress and results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Starting => write!(f, "starting"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Ephemeral progress event emitted while a portal run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingProgress {
    pub portal: String,
    pub status: RunStatus,
    pub percent_complete: u8,
    pub records_found: u32,
    pub message: String,
}

impl ScrapingProgress {
    pub fn new(portal: &str, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            portal: portal.to_string(),
            status,
            percent_complete: 0,
            records_found: 0,
            message: message.into(),
        }
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent_complete = percent;
        self
    }

    pub fn records(mut self, count: u32) -> Self {
        self.records_found = count;
        self
    }
}

/// Terminal value for one portal run. An empty-but-successful result
/// ("portal yielded nothing this run") is distinguishable from a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingResult {
    pub portal: String,
    pub success: bool,
    pub record_count: usize,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub strategy_used: Option<String>,
    pub records: Vec<RawRecord>,
}

impl ScrapingResult {
    pub fn failure(portal: &str, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            portal: portal.to_string(),
            success: false,
            record_count: 0,
            error_message: Some(message.into()),
            duration_ms,
            strategy_used: None,
            records: Vec::new(),
        }
    }
}

// --- Portal configuration ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Internal JSON/GraphQL endpoint some portals expose. The payload is sent
/// as-is; `records_pointer` locates the record array in the response and
/// `field_map` maps record fields to JSON pointers within each element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub url: String,
    pub payload: serde_json::Value,
    pub records_pointer: String,
    pub title_pointer: String,
    pub external_id_pointer: String,
    pub issuing_entity_pointer: Option<String>,
    pub description_pointer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEndpoint {
    pub url: String,
    pub format: ExportFormat,
}

/// Per-portal configuration consumed by the strategy chain. Field extraction
/// stays mechanical (pointers and href patterns); selector-table heuristics
/// live outside the acquisition core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub name: String,
    pub base_url: String,
    pub search_url: String,
    pub api: Option<ApiEndpoint>,
    pub export: Option<ExportEndpoint>,
    /// Substring that listing detail links contain on this portal.
    pub listing_pattern: String,
    /// Whether the heavyweight browser-automation fallback may run.
    pub browser_enabled: bool,
    /// Per-domain minimum request interval override, in seconds.
    pub delay_override_secs: Option<f64>,
}

/// Extract the host portion of a URL for politeness bookkeeping.
pub fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

pub mod audit;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::CrawlConfig;
pub use error::ScrapeError;
pub use store::{LogStore, MemoryStore, OpportunityStore, StoreQuery};
pub use types::*;

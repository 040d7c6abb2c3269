pub mod orchestrator;
pub mod politeness;
pub mod portal;
pub mod sources;
pub mod strategies;
pub mod strategy;
pub mod transport;

pub use orchestrator::{Orchestrator, OrchestratorStatus, ProgressCallback};
pub use politeness::PolitenessEngine;
pub use portal::PortalScraper;
pub use strategy::{AcquisitionStrategy, ChainOutcome, StrategyChain};
pub use transport::{Backend, FetchRequest, Transport};

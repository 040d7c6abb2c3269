//! Concrete acquisition strategies, ordered most-structured to least.
//!
//! Structured sources (internal APIs, exports) are faster, cheaper, and less
//! brittle; browser automation sits at the bottom of the chain precisely
//! because it is slow and fragile.

pub mod api;
pub mod browser;
pub mod content;
pub mod export;
pub mod listing;
pub mod rendered_dom;
pub mod static_html;

use std::sync::Arc;

use crate::strategy::StrategyChain;
use crate::transport::Transport;

pub use api::ApiQueryStrategy;
pub use browser::BrowserAutomationStrategy;
pub use export::ExportStrategy;
pub use rendered_dom::RenderedDomStrategy;
pub use static_html::StaticHtmlStrategy;

/// The standard five-step chain every portal starts from. Per-portal
/// availability checks trim it at runtime (no API endpoint configured, no
/// render service deployed, browser disabled).
pub fn standard_chain(transport: &Arc<Transport>) -> StrategyChain {
    StrategyChain::new(vec![
        Arc::new(ApiQueryStrategy::new(transport.clone())),
        Arc::new(ExportStrategy::new(transport.clone())),
        Arc::new(StaticHtmlStrategy::new(transport.clone())),
        Arc::new(RenderedDomStrategy::new(transport.clone())),
        Arc::new(BrowserAutomationStrategy::new(transport.clone())),
    ])
}

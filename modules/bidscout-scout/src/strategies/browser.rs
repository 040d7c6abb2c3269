use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use bidscout_common::{PortalConfig, RawRecord, ScrapeError};

use crate::strategies::{content, listing};
use crate::strategy::AcquisitionStrategy;
use crate::transport::{Backend, FetchRequest, Transport};

/// Full local-browser automation. Last resort: slow, heavy, and fragile,
/// kept at the bottom of the chain and gated per portal.
pub struct BrowserAutomationStrategy {
    transport: Arc<Transport>,
}

impl BrowserAutomationStrategy {
    pub const NAME: &'static str = "browser";

    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AcquisitionStrategy for BrowserAutomationStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self, portal: &PortalConfig) -> bool {
        portal.browser_enabled && self.transport.has_browser()
    }

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let req = FetchRequest::get(&portal.search_url);
        let resp = self
            .transport
            .fetch(&req, Backend::Browser, Self::NAME)
            .await?;

        if resp.body.is_empty() {
            warn!(portal = portal.name.as_str(), "browser returned empty DOM");
            return Ok(Vec::new());
        }

        let links = listing::extract_listing_links(
            &resp.body,
            &portal.base_url,
            &portal.listing_pattern,
            limit,
        );

        if links.is_empty()
            && content::readable_text(&resp.body, &portal.search_url).is_empty()
        {
            warn!(
                portal = portal.name.as_str(),
                "browser DOM had no readable content"
            );
        }

        Ok(links.iter().map(listing::record_from_link).collect())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use bidscout_common::{PortalConfig, RawRecord, ScrapeError};

use crate::strategies::{content, listing};
use crate::strategy::AcquisitionStrategy;
use crate::transport::{Backend, FetchRequest, Transport};

/// Renders the search page through the headless render service and extracts
/// listing links from the post-JS DOM.
pub struct RenderedDomStrategy {
    transport: Arc<Transport>,
}

impl RenderedDomStrategy {
    pub const NAME: &'static str = "rendered_dom";

    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AcquisitionStrategy for RenderedDomStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self, _portal: &PortalConfig) -> bool {
        self.transport.has_renderer()
    }

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let req = FetchRequest::get(&portal.search_url);
        let resp = self
            .transport
            .fetch(&req, Backend::Renderer, Self::NAME)
            .await?;

        let links = listing::extract_listing_links(
            &resp.body,
            &portal.base_url,
            &portal.listing_pattern,
            limit,
        );

        if links.is_empty() {
            // Distinguish "rendered a page with no listings" from "rendered
            // nothing at all"; both fall through, but the latter is worth a
            // louder note.
            if content::readable_text(&resp.body, &portal.search_url).is_empty() {
                warn!(
                    portal = portal.name.as_str(),
                    "rendered DOM had no readable content"
                );
            }
            return Ok(Vec::new());
        }

        Ok(links.iter().map(listing::record_from_link).collect())
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use bidscout_common::{PortalConfig, RawRecord, ScrapeError};

use crate::strategies::listing;
use crate::strategy::AcquisitionStrategy;
use crate::transport::{Backend, FetchRequest, Transport};

/// Plain GET of the portal's search page. Works for server-rendered portals;
/// JS-rendered ones come back empty here and fall through to the browser
/// strategies.
pub struct StaticHtmlStrategy {
    transport: Arc<Transport>,
}

impl StaticHtmlStrategy {
    pub const NAME: &'static str = "static_html";

    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AcquisitionStrategy for StaticHtmlStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self, _portal: &PortalConfig) -> bool {
        true
    }

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let req = FetchRequest::get(&portal.search_url);
        let resp = self.transport.fetch(&req, Backend::Http, Self::NAME).await?;

        let links = listing::extract_listing_links(
            &resp.body,
            &portal.base_url,
            &portal.listing_pattern,
            limit,
        );

        Ok(links.iter().map(listing::record_from_link).collect())
    }
}

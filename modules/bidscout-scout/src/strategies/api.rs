use std::sync::Arc;

use async_trait::async_trait;

use bidscout_common::{ApiEndpoint, PortalConfig, RawRecord, ScrapeError};

use crate::strategy::AcquisitionStrategy;
use crate::transport::{Backend, FetchRequest, Transport};

/// Queries a portal's internal JSON or GraphQL endpoint. The most reliable
/// source when one exists: structured, fast, and cheap.
pub struct ApiQueryStrategy {
    transport: Arc<Transport>,
}

impl ApiQueryStrategy {
    pub const NAME: &'static str = "api_query";

    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    fn parse_records(
        api: &ApiEndpoint,
        body: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ScrapeError::Parse(format!("API response is not JSON: {e}")))?;

        let rows = value
            .pointer(&api.records_pointer)
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ScrapeError::Parse(format!(
                    "no record array at pointer {}",
                    api.records_pointer
                ))
            })?;

        let mut records = Vec::new();
        for row in rows.iter().take(limit) {
            let Some(title) = pointer_str(row, &api.title_pointer) else {
                continue;
            };
            let external_id = pointer_str(row, &api.external_id_pointer)
                .unwrap_or_else(|| title.clone());

            let mut record = RawRecord::skeleton(title, external_id);
            record.issuing_entity = api
                .issuing_entity_pointer
                .as_deref()
                .and_then(|p| pointer_str(row, p));
            record.description = api
                .description_pointer
                .as_deref()
                .and_then(|p| pointer_str(row, p));
            records.push(record);
        }

        Ok(records)
    }
}

fn pointer_str(row: &serde_json::Value, pointer: &str) -> Option<String> {
    row.pointer(pointer).and_then(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl AcquisitionStrategy for ApiQueryStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self, portal: &PortalConfig) -> bool {
        portal.api.is_some()
    }

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let api = portal.api.as_ref().ok_or_else(|| {
            ScrapeError::Parse(format!("portal {} has no API endpoint", portal.name))
        })?;

        let req = FetchRequest::post_json(&api.url, api.payload.clone());
        let resp = self.transport.fetch(&req, Backend::Http, Self::NAME).await?;

        Self::parse_records(api, &resp.body, limit)
    }
}

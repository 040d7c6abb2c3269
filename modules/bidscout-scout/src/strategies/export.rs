use std::sync::Arc;

use async_trait::async_trait;

use bidscout_common::{ExportFormat, PortalConfig, RawRecord, ScrapeError};

use crate::strategy::AcquisitionStrategy;
use crate::transport::{Backend, FetchRequest, Transport};

/// Pulls a portal's bulk export endpoint (CSV or JSON). Second choice after
/// the internal API: still structured, but usually a stale snapshot.
pub struct ExportStrategy {
    transport: Arc<Transport>,
}

impl ExportStrategy {
    pub const NAME: &'static str = "export";

    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    fn parse_csv(body: &str, limit: usize) -> Result<Vec<RawRecord>, ScrapeError> {
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| ScrapeError::Parse("empty export".to_string()))?;
        let columns: Vec<String> = split_csv_line(header)
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .collect();

        let title_idx = find_column(&columns, &["title", "description", "name"])
            .ok_or_else(|| ScrapeError::Parse("export has no title column".to_string()))?;
        let id_idx = find_column(
            &columns,
            &["id", "bid number", "bid_no", "solicitation", "reference"],
        );
        let entity_idx = find_column(&columns, &["agency", "department", "entity", "buyer"]);

        let mut records = Vec::new();
        for line in lines.take(limit) {
            let fields = split_csv_line(line);
            let Some(title) = fields.get(title_idx).filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let external_id = id_idx
                .and_then(|i| fields.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| title.trim().to_string());

            let mut record = RawRecord::skeleton(title.trim(), external_id);
            record.issuing_entity = entity_idx
                .and_then(|i| fields.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            records.push(record);
        }

        Ok(records)
    }

    fn parse_json(body: &str, limit: usize) -> Result<Vec<RawRecord>, ScrapeError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ScrapeError::Parse(format!("export is not JSON: {e}")))?;

        let rows = value
            .as_array()
            .or_else(|| value.pointer("/data").and_then(|v| v.as_array()))
            .or_else(|| value.pointer("/results").and_then(|v| v.as_array()))
            .ok_or_else(|| ScrapeError::Parse("export JSON has no record array".to_string()))?;

        let mut records = Vec::new();
        for row in rows.iter().take(limit) {
            let Some(title) = first_string(row, &["title", "name", "description"]) else {
                continue;
            };
            let external_id = first_string(
                row,
                &["external_id", "id", "bid_number", "solicitation_id", "reference"],
            )
            .unwrap_or_else(|| title.clone());

            let mut record = RawRecord::skeleton(title, external_id);
            record.issuing_entity = first_string(row, &["agency", "department", "entity"]);
            record.description = first_string(row, &["summary", "details"]);
            records.push(record);
        }

        Ok(records)
    }
}

/// Split one CSV line, honoring double-quoted fields with doubled-quote
/// escapes. Enough for the exports these portals emit.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn find_column(columns: &[String], candidates: &[&str]) -> Option<usize> {
    for candidate in candidates {
        if let Some(i) = columns.iter().position(|c| c.contains(candidate)) {
            return Some(i);
        }
    }
    None
}

fn first_string(row: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match row.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[async_trait]
impl AcquisitionStrategy for ExportStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self, portal: &PortalConfig) -> bool {
        portal.export.is_some()
    }

    async fn execute(
        &self,
        portal: &PortalConfig,
        limit: usize,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let export = portal.export.as_ref().ok_or_else(|| {
            ScrapeError::Parse(format!("portal {} has no export endpoint", portal.name))
        })?;

        let req = FetchRequest::get(&export.url);
        let resp = self.transport.fetch(&req, Backend::Http, Self::NAME).await?;

        match export.format {
            ExportFormat::Csv => Self::parse_csv(&resp.body, limit),
            ExportFormat::Json => Self::parse_json(&resp.body, limit),
        }
    }
}

//! Portal catalog: the Texas procurement portals we poll and how each one
//! wants to be approached. Everything a strategy needs to know about a
//! portal lives here; the strategies themselves stay portal-agnostic.

use serde_json::json;

use bidscout_common::{ApiEndpoint, ExportEndpoint, ExportFormat, PortalConfig};

/// Build the config for a portal by key. Returns `None` for unknown keys;
/// callers surface that as an orchestration error.
pub fn portal_config(name: &str) -> Option<PortalConfig> {
    match name {
        "esbd" => Some(esbd()),
        "houston" => Some(houston()),
        "san_antonio" => Some(san_antonio()),
        _ => None,
    }
}

/// Every portal in the catalog, in polling order.
pub fn all_portals() -> Vec<PortalConfig> {
    vec![esbd(), houston(), san_antonio()]
}

pub fn portal_names() -> Vec<&'static str> {
    vec!["esbd", "houston", "san_antonio"]
}

/// Texas SmartBuy Electronic State Business Daily. Server-rendered CFML;
/// detail links carry a `bidid` query parameter. No structured endpoints,
/// so the chain falls straight through to static HTML.
fn esbd() -> PortalConfig {
    PortalConfig {
        name: "esbd".to_string(),
        base_url: "http://www.txsmartbuy.com".to_string(),
        search_url: "http://www.txsmartbuy.com/esbd".to_string(),
        api: None,
        export: None,
        listing_pattern: "bid_show.cfm?bidid".to_string(),
        browser_enabled: false,
        delay_override_secs: None,
    }
}

/// City of Houston on BeaconBid. The public site is a JS application, but
/// it is backed by a GraphQL endpoint that serves the same listings; the
/// API strategy almost always wins here. Browser automation stays enabled
/// as the last-ditch fallback for when the schema shifts.
fn houston() -> PortalConfig {
    PortalConfig {
        name: "houston".to_string(),
        base_url: "https://www.beaconbid.com".to_string(),
        search_url: "https://www.beaconbid.com/solicitations/city-of-houston".to_string(),
        api: Some(ApiEndpoint {
            url: "https://www.beaconbid.com/api/gql".to_string(),
            payload: json!({
                "operationName": "Solicitations",
                "variables": {
                    "agencySlug": "city-of-houston",
                    "status": "open",
                },
                "query": "query Solicitations($agencySlug: String!, $status: String) { \
                          solicitations(agencySlug: $agencySlug, status: $status) { \
                          id title agencyName description dueDate } }",
            }),
            records_pointer: "/data/solicitations".to_string(),
            title_pointer: "/title".to_string(),
            external_id_pointer: "/id".to_string(),
            issuing_entity_pointer: Some("/agencyName".to_string()),
            description_pointer: Some("/description".to_string()),
        }),
        export: Some(ExportEndpoint {
            url: "https://www.beaconbid.com/api/solicitations/export?agency=city-of-houston"
                .to_string(),
            format: ExportFormat::Json,
        }),
        listing_pattern: "/solicitations/city-of-houston/".to_string(),
        browser_enabled: true,
        delay_override_secs: None,
    }
}

/// City of San Antonio bid and contract opportunities. ASP.NET postback
/// site; listings only materialize after JS runs, so the rendered-DOM and
/// browser fallbacks do the real work. The city asks for a gentler pace
/// than our default.
fn san_antonio() -> PortalConfig {
    PortalConfig {
        name: "san_antonio".to_string(),
        base_url: "https://webapp1.sanantonio.gov".to_string(),
        search_url: "https://webapp1.sanantonio.gov/BidContractOpps/Default.aspx".to_string(),
        api: None,
        export: None,
        listing_pattern: "BidContractOpps/Details".to_string(),
        browser_enabled: true,
        delay_override_secs: Some(5.0),
    }
}

//! Mechanical listing extraction shared by the HTML-shaped strategies.
//!
//! Pulls detail-page links matching a portal's href pattern out of raw HTML
//! and turns them into skeletal records. Anything smarter (selector tables,
//! field heuristics) lives outside the acquisition core.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use bidscout_common::RawRecord;

#[derive(Debug, Clone)]
pub struct ListingLink {
    pub url: String,
    pub text: String,
}

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
            .expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Extract links whose resolved URL contains `pattern`. Relative hrefs are
/// resolved against `base_url`; results are deduplicated and capped.
pub fn extract_listing_links(
    html: &str,
    base_url: &str,
    pattern: &str,
    cap: usize,
) -> Vec<ListingLink> {
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap_groups in anchor_regex().captures_iter(html) {
        let raw = &cap_groups[1];

        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(ref b) = base {
            match b.join(raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if resolved.contains(pattern) && seen.insert(resolved.clone()) {
            let text = tag_regex()
                .replace_all(&cap_groups[2], " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            links.push(ListingLink {
                url: resolved,
                text,
            });
            if links.len() >= cap {
                break;
            }
        }
    }

    links
}

/// Best-effort external id for a detail link: an id-ish query parameter if
/// one exists, otherwise the last path segment, otherwise the whole URL.
pub fn external_id_from_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        for (key, value) in parsed.query_pairs() {
            if key.to_lowercase().contains("id") && !value.is_empty() {
                return value.into_owned();
            }
        }
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
        {
            return segment.to_string();
        }
    }
    url.to_string()
}

/// Skeletal record for a listing link. The anchor text becomes the title
/// when present; the detail URL rides along as a document link.
pub fn record_from_link(link: &ListingLink) -> RawRecord {
    let title = if link.text.is_empty() {
        link.url.clone()
    } else {
        link.text.clone()
    };
    let mut record = RawRecord::skeleton(title, external_id_from_url(&link.url));
    record.document_urls.push(link.url.clone());
    record
}

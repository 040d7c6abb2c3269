use thiserror::Error;

/// Error taxonomy for the acquisition layer.
///
/// Strategy- and fetch-level errors are absorbed at the strategy chain
/// boundary; only `Orchestration` errors surface as a failed run.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("robots.txt disallows {0}")]
    RobotsDisallowed(String),

    /// Timeout, connection reset, 5xx, or HTTP 429. Retried with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// 4xx other than 429, malformed URL. Never retried.
    #[error("permanent request error (status {status:?}): {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// Response received but structurally unusable by the current strategy.
    #[error("parse error: {0}")]
    Parse(String),

    /// Browser-backend failure: crash, launch failure, navigation timeout.
    #[error("browser automation error: {0}")]
    Automation(String),

    /// Bug inside orchestration logic itself, not inside a strategy.
    #[error("orchestration error: {0}")]
    Orchestration(String),
}

impl ScrapeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScrapeError::Transient(_))
    }

    /// Stable tag for audit records and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::RobotsDisallowed(_) => "robots_disallowed",
            ScrapeError::Transient(_) => "transient",
            ScrapeError::Permanent { .. } => "permanent",
            ScrapeError::Parse(_) => "parse",
            ScrapeError::Automation(_) => "automation",
            ScrapeError::Orchestration(_) => "orchestration",
        }
    }

    /// Classify an HTTP status code. 2xx is not an error and returns None.
    pub fn from_status(status: u16, url: &str) -> Option<ScrapeError> {
        match status {
            200..=299 => None,
            429 => Some(ScrapeError::Transient(format!("HTTP 429 for {url}"))),
            500..=599 => Some(ScrapeError::Transient(format!("HTTP {status} for {url}"))),
            _ => Some(ScrapeError::Permanent {
                status: Some(status),
                message: format!("HTTP {status} for {url}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ScrapeError::from_status(200, "u").is_none());
        assert!(ScrapeError::from_status(503, "u").unwrap().is_transient());
        assert!(ScrapeError::from_status(429, "u").unwrap().is_transient());
        assert!(!ScrapeError::from_status(404, "u").unwrap().is_transient());
        assert!(!ScrapeError::from_status(403, "u").unwrap().is_transient());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            ScrapeError::RobotsDisallowed("x".into()).kind(),
            "robots_disallowed"
        );
        assert_eq!(ScrapeError::Transient("x".into()).kind(), "transient");
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RendererError>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Network error: {message}")]
    Network { message: String, timed_out: bool },

    #[error("Render service error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl RendererError {
    /// Timeouts and 5xx responses from the render service are worth a retry;
    /// anything else is a hard failure of the rendering path.
    pub fn is_transient(&self) -> bool {
        match self {
            RendererError::Network { timed_out, .. } => *timed_out,
            RendererError::Api { status, .. } => *status == 429 || (500..600).contains(status),
        }
    }
}

impl From<reqwest::Error> for RendererError {
    fn from(err: reqwest::Error) -> Self {
        RendererError::Network {
            message: err.to_string(),
            timed_out: err.is_timeout() || err.is_connect(),
        }
    }
}

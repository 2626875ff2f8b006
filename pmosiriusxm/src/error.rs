//! Error types for the SiriusXM proxy

/// Result type alias for SiriusXM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to SiriusXM or serving the proxy
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Upstream refused a segment, usually because the session expired
    #[error("Segment retrieval failed: {0}")]
    SegmentRetrieval(String),

    /// Login or session resume was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No channel matches the identifier
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// API returned an error status in its response envelope
    #[error("SiriusXM API error (code {code}): {message}")]
    ApiError { code: i64, message: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a segment retrieval error
    pub fn segment_retrieval(msg: impl Into<String>) -> Self {
        Self::SegmentRetrieval(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// True when the error signals an expired or invalid upstream session
    pub fn is_segment_retrieval(&self) -> bool {
        matches!(self, Self::SegmentRetrieval(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::ChannelNotFound("octane".into()).to_string(),
            "Channel not found: octane"
        );
        assert!(Error::segment_retrieval("expired").is_segment_retrieval());
        assert!(!Error::authentication("denied").is_segment_retrieval());
    }

    #[test]
    fn test_missing_channel_converts_to_anyhow() {
        let lookup: Option<u32> = None;
        let err: anyhow::Error = lookup
            .ok_or_else(|| Error::ChannelNotFound("hits1".into()))
            .unwrap_err()
            .into();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ChannelNotFound(id)) if id == "hits1"
        ));
    }
}

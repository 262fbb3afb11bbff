use thiserror::Error;

/// Errors raised by the Ring event source.
///
/// The variants are shaped so the download executor can classify them into
/// retry kinds without string matching: HTTP statuses stay numeric and a
/// connection dropped mid-body has its own variant.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Remote end closed the connection: {0}")]
    Disconnected(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Device '{name}' not found. Available devices: {available:?}")]
    DeviceNotFound { name: String, available: Vec<String> },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while obtaining or refreshing an OAuth token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Two-factor code required: rerun with --otp (or RING_OTP)")]
    TwoFactorRequired,

    #[error("No cached token at {0} and no username/password supplied")]
    MissingCredentials(String),

    #[error("Token request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

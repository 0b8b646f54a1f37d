use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the auto-reply service
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authorization failed; fatal at startup
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Stored credential exists but cannot be used
    #[error("Stored credential is unusable: {0}")]
    CredentialCorrupt(String),

    /// Resource already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// From header carries no angle-bracket address
    #[error("Malformed {header} header on message {message_id}: {value:?}")]
    MalformedHeader {
        message_id: String,
        header: String,
        value: String,
    },

    /// Required header absent from message metadata
    #[error("Message {message_id} has no {header} header")]
    MissingHeader { message_id: String, header: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// A poll loop is already active in this process
    #[error("Poll loop already running")]
    LoopAlreadyRunning,

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GmailError {
    /// Check if the error is transient (the next cycle may succeed)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors scoped to a single message; the cycle skips the message and moves on
    pub fn is_message_scoped(&self) -> bool {
        matches!(
            self,
            GmailError::MalformedHeader { .. }
                | GmailError::MissingHeader { .. }
                | GmailError::InvalidMessageFormat(_)
                | GmailError::NotFound(_)
        )
    }

    /// Map an HTTP status to an error variant
    fn from_status(status_code: u16, message: String, retry_after: u64) -> Self {
        match status_code {
            429 => GmailError::RateLimitExceeded { retry_after },
            409 => GmailError::Conflict(message),
            404 => GmailError::NotFound(message),
            400 => GmailError::BadRequest(message),
            401 => GmailError::AuthError(message),
            403 => GmailError::Forbidden(message),
            500..=599 => GmailError::ServerError {
                status: status_code,
                message,
            },
            _ => GmailError::ApiError(message),
        }
    }
}

const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse the Retry-After header from an HTTP response
///
/// Accepts delay-seconds ("120") or an HTTP-date. Missing, invalid or past
/// values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

/// Pull `error.code` / `error.message` out of a Google JSON error body
fn parse_error_body(body: &serde_json::Value) -> (Option<u16>, String) {
    let error = body.get("error");
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok());
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    (code, message)
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // Non-success response without a JSON body
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                GmailError::from_status(
                    status.as_u16(),
                    message,
                    parse_retry_after_header(response),
                )
            }
            // Non-success response with a JSON error body
            google_gmail1::Error::BadRequest(ref body) => match parse_error_body(body) {
                (Some(code), message) => {
                    GmailError::from_status(code, message, DEFAULT_RETRY_AFTER)
                }
                (None, message) => GmailError::BadRequest(message),
            },
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("No token available: {}", err))
            }
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}

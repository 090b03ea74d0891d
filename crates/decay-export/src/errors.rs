use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Errors that end the whole run instead of a single date.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExportError::BrowserLaunch(_) | ExportError::Config(_))
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Protocol(format!("Malformed message: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ExportError::Protocol(format!("WebSocket error: {e}"))
    }
}

//! Error types for the report job

use std::fmt;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug)]
pub enum ReportError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Controller rejected the login or could not be reached for it
    Auth(String),

    /// Controller answered a query with an error or an unusable body
    Query(String),

    /// Spreadsheet could not be built or written
    Render(rust_xlsxwriter::XlsxError),

    /// Message could not be built or submitted
    Mail(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Io(err) => write!(f, "IO error: {}", err),
            ReportError::Http(err) => write!(f, "HTTP error: {}", err),
            ReportError::Json(err) => write!(f, "JSON error: {}", err),
            ReportError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ReportError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ReportError::Query(msg) => write!(f, "Query error: {}", msg),
            ReportError::Render(err) => write!(f, "Render error: {}", err),
            ReportError::Mail(msg) => write!(f, "Mail error: {}", msg),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Io(err) => Some(err),
            ReportError::Http(err) => Some(err),
            ReportError::Json(err) => Some(err),
            ReportError::Render(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        ReportError::Io(err)
    }
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        ReportError::Http(err)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Json(err)
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ReportError::Render(err)
    }
}

impl From<lettre::error::Error> for ReportError {
    fn from(err: lettre::error::Error) -> Self {
        ReportError::Mail(err.to_string())
    }
}

impl From<lettre::address::AddressError> for ReportError {
    fn from(err: lettre::address::AddressError) -> Self {
        ReportError::Mail(format!("invalid address: {}", err))
    }
}

impl From<lettre::transport::smtp::Error> for ReportError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        ReportError::Mail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_messages() {
        let err = ReportError::Auth("bad credentials".to_string());
        assert_eq!(err.to_string(), "Authentication error: bad credentials");

        let err = ReportError::Query("errorCode 112498".to_string());
        assert_eq!(err.to_string(), "Query error: errorCode 112498");
    }

    #[test]
    fn test_io_error_has_source() {
        let err: ReportError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(ReportError::Config("x".to_string()).source().is_none());
    }
}

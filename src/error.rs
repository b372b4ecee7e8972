use http::StatusCode;
use thiserror::Error;

use crate::common::ResponseBuilder;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Requested size {0} exceeds the URI size limit")]
    UriTooLong(u64),

    #[error("Origin unavailable: {0}")]
    UpstreamUnreachable(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Client request timed out: {0}")]
    RequestTimeout(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedRequest(_) | ProxyError::Url(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed(_) => StatusCode::NOT_IMPLEMENTED,
            ProxyError::UriTooLong(_) => StatusCode::URI_TOO_LONG,
            ProxyError::UpstreamUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Io(_) | ProxyError::Cache(_) | ProxyError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Fixed status line for this error, e.g. `HTTP/1.1 414 URI Too Long`.
    pub fn status_line(&self) -> String {
        ResponseBuilder::status_line(self.status())
    }

    /// Client-facing body text. Internal failures carry the diagnostic detail.
    pub fn reason(&self) -> String {
        match self {
            ProxyError::MalformedRequest(_) | ProxyError::Url(_) => "Malformed request".to_string(),
            ProxyError::MethodNotAllowed(method) => format!("Method {} is not supported", method),
            ProxyError::UriTooLong(_) => "Requested URI is too long".to_string(),
            ProxyError::UpstreamUnreachable(_) => "origin unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> Vec<u8> {
        ResponseBuilder::error(self.status(), &self.reason())
    }

    /// Maps a failed upstream connect into the variant the caller reports.
    pub fn from_connect(err: std::io::Error, target: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                ProxyError::UpstreamUnreachable(format!("{}: {}", target, err))
            }
            std::io::ErrorKind::TimedOut => ProxyError::Timeout(format!("{}: {}", target, err)),
            _ => ProxyError::BadGateway(format!("{}: {}", target, err)),
        }
    }
}

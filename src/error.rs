//! Error types for the PDF proxy

use std::fmt;

#[derive(Debug)]
pub enum PdfProxyError {
    /// Upstream fetch failed after the retry budget was spent
    Fetch(String),
    Http(Box<reqwest::Error>),
    Config(String),
}

impl PdfProxyError {
    /// The message relayed to the client in the error body
    pub fn message(&self) -> String {
        match self {
            PdfProxyError::Fetch(msg) => msg.clone(),
            PdfProxyError::Http(err) => err.to_string(),
            PdfProxyError::Config(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for PdfProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfProxyError::Fetch(msg) => write!(f, "Fetch error: {}", msg),
            PdfProxyError::Http(err) => write!(f, "HTTP error: {}", err),
            PdfProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PdfProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PdfProxyError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PdfProxyError {
    fn from(err: reqwest::Error) -> Self {
        PdfProxyError::Http(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for PdfProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        PdfProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PdfProxyError>;

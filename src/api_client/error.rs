use reqwest::Error as ReqwestError;
use std::{fmt, io};

/// Every failure surfaced by the SmugMug client and the commands built on it.
///
/// Variants carrying a message display it verbatim, so each error renders as
/// a single line next to the regular command output.
#[derive(Debug)]
pub enum SmugError {
    IoError(io::Error),
    JsonParseError(serde_json::Error),
    ApiError { code: u16, message: String },
    ReqwestError(ReqwestError),
    InvalidArgument(String),
    NotLoggedIn(String),
    RemoteData(String),
    UnexpectedResponse(String),
    ConnectionInterrupted,
    Limits(String),
    InvalidPath(String),
    ExtractMetadata(String),
    Config(String),
    Other(String),
}

impl fmt::Display for SmugError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SmugError::IoError(e) => write!(f, "IO error: {}", e),
            SmugError::JsonParseError(e) => write!(f, "JSON parse error: {}", e),
            SmugError::ApiError { code, message } => {
                write!(f, "API error ({}): {}", code, message)
            }
            SmugError::ReqwestError(e) => write!(f, "Request error: {}", e),
            SmugError::ConnectionInterrupted => write!(f, "File transfer interrupted."),
            SmugError::InvalidArgument(s)
            | SmugError::NotLoggedIn(s)
            | SmugError::RemoteData(s)
            | SmugError::UnexpectedResponse(s)
            | SmugError::Limits(s)
            | SmugError::InvalidPath(s)
            | SmugError::ExtractMetadata(s)
            | SmugError::Config(s)
            | SmugError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for SmugError {}

impl From<io::Error> for SmugError {
    fn from(error: io::Error) -> Self {
        SmugError::IoError(error)
    }
}

impl From<serde_json::Error> for SmugError {
    fn from(error: serde_json::Error) -> Self {
        SmugError::JsonParseError(error)
    }
}

impl From<ReqwestError> for SmugError {
    fn from(error: ReqwestError) -> Self {
        SmugError::ReqwestError(error)
    }
}

impl From<config::ConfigError> for SmugError {
    fn from(error: config::ConfigError) -> Self {
        SmugError::Config(error.to_string())
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StatError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote returned HTTP {status} for {url}: {message}")]
    Remote {
        status: u16,
        url: String,
        message: String,
    },
    #[error("HTTP transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("error {operation} for {target}: {source}")]
    Listing {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<StatError>,
    },
    #[error("invalid format: {0}")]
    InvalidAlias(String),
    #[error("invalid host {0:?}: {1}")]
    InvalidHost(String, String),
    #[error("invalid Git server {0:?}")]
    UnknownServer(String),
    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StatError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            StatError::Cancelled => true,
            StatError::Listing { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StatError::NotFound(_))
    }

    pub fn listing(operation: &'static str, target: impl Into<String>, source: StatError) -> Self {
        StatError::Listing {
            operation,
            target: target.into(),
            source: Box::new(source),
        }
    }
}

impl From<reqwest::Error> for StatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StatError::Decode(err.to_string())
        } else {
            StatError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StatError {
    fn from(err: serde_json::Error) -> Self {
        StatError::Decode(err.to_string())
    }
}

impl From<regex::Error> for StatError {
    fn from(err: regex::Error) -> Self {
        StatError::InvalidPattern(err.to_string())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message} (status {status})")]
    Status { status: u16, message: String },

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

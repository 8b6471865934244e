// Error types for the analyzer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("event {run}:{event} has no primary vertex")]
    NoPrimaryVertex { run: u32, event: u64 },

    #[error("classifier model error: {0}")]
    Model(String),

    #[error("malformed event on input line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

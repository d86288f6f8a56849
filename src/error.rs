use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Upstream delivery error: {0}")]
    DeliveryError(String),

    #[error("Upstream returned {status} {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Scanner error: {0}")]
    ScannerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

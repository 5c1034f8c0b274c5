//! Error types for Autopost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutopostError>;

#[derive(Error, Debug)]
pub enum AutopostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AutopostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AutopostError::InvalidInput(_) => 3,
            AutopostError::Store(StoreError::RunNotFound(_)) => 2,
            AutopostError::Store(_) => 1,
            AutopostError::Run(_) => 1,
            AutopostError::Config(_) => 1,
            AutopostError::Collaborator(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote store request failed: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("Remote store returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Invalid remote store URL: {0}")]
    InvalidUrl(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Progress may not decrease: {0}")]
    ProgressRegression(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Run {0} already has an active worker")]
    AlreadyActive(String),

    #[error("Run {0} has already finished")]
    AlreadyFinished(String),

    #[error("Processor is busy with run {0}")]
    ProcessorBusy(String),

    #[error("Worker for run {run_id} exited abnormally: {message}")]
    WorkerFailed { run_id: String, message: String },
}

/// Errors surfaced by the external collaborators a run drives.
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Generated content was empty")]
    EmptyContent,

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Image rendering failed: {0}")]
    Render(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl CollaboratorError {
    /// Whether retrying the same call might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Network(_) | CollaboratorError::RateLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = AutopostError::InvalidInput("No items selected".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_run_not_found() {
        let error = AutopostError::Store(StoreError::RunNotFound("abc".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let store = AutopostError::Store(StoreError::Unavailable("down".to_string()));
        assert_eq!(store.exit_code(), 1);

        let run = AutopostError::Run(RunError::AlreadyActive("abc".to_string()));
        assert_eq!(run.exit_code(), 1);

        let config = AutopostError::Config(ConfigError::MissingField("store.path".to_string()));
        assert_eq!(config.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = AutopostError::Run(RunError::AlreadyActive("run-1".to_string()));
        assert_eq!(
            error.to_string(),
            "Run error: Run run-1 already has an active worker"
        );

        let error = AutopostError::Store(StoreError::InvalidTransition {
            from: "completed".to_string(),
            to: "running".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Storage error: Invalid status transition from completed to running"
        );
    }

    #[test]
    fn test_collaborator_error_conversion() {
        let error: AutopostError = CollaboratorError::Upstream("502".to_string()).into();
        match error {
            AutopostError::Collaborator(CollaboratorError::Upstream(msg)) => assert_eq!(msg, "502"),
            other => panic!("Expected Collaborator error, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_errors() {
        assert!(CollaboratorError::Network("reset".to_string()).is_transient());
        assert!(CollaboratorError::RateLimit("429".to_string()).is_transient());
        assert!(!CollaboratorError::Publish("403".to_string()).is_transient());
        assert!(!CollaboratorError::BadInput("no url".to_string()).is_transient());
        assert!(!CollaboratorError::EmptyContent.is_transient());
    }
}

//! Error types shared across the orchestrator.

use thiserror::Error;

/// Result type for manifest parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while parsing or validating a pipeline manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid YAML: {0}")]
    InvalidYaml(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("job '{job}' references unknown job '{target}'")]
    UnknownReference { job: String, target: String },

    #[error("cyclic job group reference detected at '{0}'")]
    CyclicReference(String),
}

/// Result type for container runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised by the container runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("invalid resource limit: {0}")]
    InvalidLimit(String),

    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Result type for engine-level operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the pipeline engine and Control API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("manifest source error: {0}")]
    ManifestSource(String),

    #[error("run {0} not found")]
    RunNotFound(u64),

    #[error("pipeline '{0}' has no jobs")]
    EmptyPipeline(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for application configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading [`crate::config::AppConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required configuration section '{0}'")]
    MissingSection(String),
}

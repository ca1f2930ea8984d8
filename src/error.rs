use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Lifecycle errors
    #[error("Failed to launch process: {0}")]
    Launch(String),

    #[error("Instance {0} is not running")]
    NotRunning(String),

    #[error("Restart limit exceeded for {0}")]
    RestartLimitExceeded(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Process group already exists: {0}")]
    GroupAlreadyExists(String),

    #[error("Failed to stop instance {0}: {1}")]
    Stop(String, String),

    #[error("Signal error: {0}")]
    Signal(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // Watch errors
    #[error("Watch error: {0}")]
    Watch(String),

    // Log errors
    #[error("Log error: {0}")]
    Log(String),

    #[error("Failed to open log file: {0}")]
    LogFile(String),

    #[error("Log rotation failed: {0}")]
    LogRotation(String),

    // The supervisor control loop has exited
    #[error("Supervisor is not running")]
    SupervisorGone,

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

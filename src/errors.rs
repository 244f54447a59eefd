use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum WorldpoolError {
    /// Launcher exited or never handed off a worker PID.
    SpawnFailure {
        session: String,
        message: String,
    },
    /// The front-end never reported the session as reachable.
    ReachabilityTimeout {
        session: String,
        waited_secs: u64,
    },
    /// One cleanup step that did not complete; recorded, never fatal.
    CleanupFailure {
        session: String,
        step: String,
        message: String,
    },
    ShuttingDown,
    SessionNotFound {
        leader: String,
    },
    InvalidSessionState {
        session: String,
        current_state: String,
        expected_state: String,
    },
    InvalidInput {
        field: String,
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    ConfigError {
        key: String,
        message: String,
    },
}

impl WorldpoolError {
    pub fn spawn(session: &str, message: impl ToString) -> Self {
        WorldpoolError::SpawnFailure {
            session: session.to_string(),
            message: message.to_string(),
        }
    }

    pub fn cleanup(session: &str, step: &str, error: impl ToString) -> Self {
        WorldpoolError::CleanupFailure {
            session: session.to_string(),
            step: step.to_string(),
            message: error.to_string(),
        }
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        WorldpoolError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: impl ToString) -> Self {
        WorldpoolError::InvalidInput {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn config(key: &str, message: impl ToString) -> Self {
        WorldpoolError::ConfigError {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for WorldpoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SpawnFailure { session, message } => {
                write!(f, "Failed to spawn session '{session}': {message}")
            }
            Self::ReachabilityTimeout {
                session,
                waited_secs,
            } => {
                write!(
                    f,
                    "Session '{session}' did not become reachable within {waited_secs}s"
                )
            }
            Self::CleanupFailure {
                session,
                step,
                message,
            } => {
                write!(f, "Cleanup step '{step}' failed for session '{session}': {message}")
            }
            Self::ShuttingDown => write!(f, "Orchestrator is shutting down"),
            Self::SessionNotFound { leader } => {
                write!(f, "No session found for leader '{leader}'")
            }
            Self::InvalidSessionState {
                session,
                current_state,
                expected_state,
            } => {
                write!(
                    f,
                    "Session '{session}' is in state '{current_state}', expected '{expected_state}'"
                )
            }
            Self::InvalidInput { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::ConfigError { key, message } => {
                write!(f, "Configuration error for key '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for WorldpoolError {}

impl From<WorldpoolError> for String {
    fn from(error: WorldpoolError) -> Self {
        error.to_string()
    }
}

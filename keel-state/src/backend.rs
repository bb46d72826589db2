//! State backend trait and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::state::StateFile;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state file was recorded for another project
    #[error("State belongs to project '{actual}', not '{expected}'")]
    ProjectMismatch { expected: String, actual: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// State file is corrupted or invalid
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current state from the backend
    ///
    /// Returns `None` if no state exists (first run)
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Write the state to the backend
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Human readable location of the state (for messages)
    fn location(&self) -> String;

    /// Read the state for a project, starting an empty one on first use
    async fn load(&self, project: &str) -> BackendResult<StateFile> {
        let mut state = match self.read_state().await? {
            Some(state) => state,
            None => {
                log::debug!("no state at {}, starting empty", self.location());
                StateFile::for_project(project)
            }
        };
        state.claim(project)?;
        Ok(state)
    }

    /// Bump the serial and write the state
    async fn persist(&self, state: &mut StateFile) -> BackendResult<()> {
        state.increment_serial();
        self.write_state(state).await
    }
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (currently only "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, String>,
}

impl BackendConfig {
    /// Local file backend at the given path
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            backend_type: "local".to_string(),
            attributes: [("path".to_string(), path.into())].into_iter().collect(),
        }
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let error = BackendError::unsupported_backend("s3");
        assert_eq!(error.to_string(), "Unsupported backend type: s3");

        let error = BackendError::ProjectMismatch {
            expected: "acme".to_string(),
            actual: "globex".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "State belongs to project 'globex', not 'acme'"
        );
    }

    #[test]
    fn test_backend_config_local() {
        let config = BackendConfig::local("custom.state.json");
        assert_eq!(config.backend_type, "local");
        assert_eq!(config.get_string("path"), Some("custom.state.json"));
        assert_eq!(config.get_string("bucket"), None);
    }
}

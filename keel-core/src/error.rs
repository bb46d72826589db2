//! Errors that abort a runbook invocation

use keel_state::BackendError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum RunbookError {
    /// A provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Reading or writing local state failed
    #[error("state error: {0}")]
    State(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A step was run before the step that produces its inputs
    #[error("{resource} is not recorded in state; {hint}")]
    PrerequisiteMissing { resource: String, hint: String },

    /// Asynchronous provisioning reached a failure status
    #[error("{label} failed to provision: last status {status}")]
    WaitFailed { label: String, status: String },

    /// Asynchronous provisioning did not finish in time
    #[error("{label} timed out after {elapsed_secs}s: last status {last_status}")]
    WaitTimedOut {
        label: String,
        last_status: String,
        elapsed_secs: u64,
    },

    #[error("interrupted by operator")]
    Cancelled,

    /// A unit name that is not configured
    #[error("unknown {kind} '{name}' (configured: {valid})")]
    UnknownUnit {
        kind: String,
        name: String,
        valid: String,
    },
}

impl RunbookError {
    pub fn prerequisite(resource: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::PrerequisiteMissing {
            resource: resource.into(),
            hint: hint.into(),
        }
    }

    pub fn unknown_unit<'a>(
        kind: &str,
        name: &str,
        valid: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self::UnknownUnit {
            kind: kind.to_string(),
            name: name.to_string(),
            valid: valid.into_iter().collect::<Vec<_>>().join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_message_names_the_fix() {
        let err = RunbookError::prerequisite(
            "vpc.acme-vpc",
            "run `keel cluster --step 1` first",
        );
        assert_eq!(
            err.to_string(),
            "vpc.acme-vpc is not recorded in state; run `keel cluster --step 1` first"
        );
    }

    #[test]
    fn unknown_unit_lists_valid_names() {
        let err = RunbookError::unknown_unit("security group", "web", ["alb", "app"]);
        assert_eq!(
            err.to_string(),
            "unknown security group 'web' (configured: alb, app)"
        );
    }

    #[test]
    fn provider_error_is_transparent() {
        let err: RunbookError = ProviderError::new("access denied").into();
        assert_eq!(err.to_string(), "access denied");
    }
}

//! Keel State Management
//!
//! Typed replacement for the key=value files the provisioning runbooks used to
//! source between steps. Every identifier, endpoint and generated credential a
//! step produces is recorded here and read back by the steps that depend on it.
//!
//! # Overview
//!
//! - **StateFile**: all resources recorded for one project
//! - **StateBackend**: a trait for state storage backends (currently local files)
//!
//! # Example
//!
//! ```ignore
//! use keel_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("keel.state.json"))?;
//! let mut state = backend.load("acme").await?;
//!
//! // ... record resources ...
//!
//! backend.persist(&mut state).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use state::{ResourceState, StateFile};

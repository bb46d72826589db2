//! Keel Core
//!
//! Idempotent provisioning of an EKS cluster and its supporting AWS resources,
//! organised as re-runnable runbooks: check whether a named resource exists,
//! create it if not, wait for it to become ready and record what it produced.

pub mod config;
pub mod error;
pub mod provider;
pub mod provisioner;
pub mod report;
pub mod resource;
pub mod runbook;
pub mod secret;
pub mod verify;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

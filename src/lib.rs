//! # pd-operator
//!
//! Keeps PagerDuty escalation policies, services and business services in
//! sync with declarative manifests. The reconciliation engine lives in
//! `pd-operator-reconciler`, the REST client in `pd-operator-pagerduty`;
//! this crate wires them to configuration, manifests and the CLI.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod manifest;
pub mod operator;

pub use config::OperatorConfig;
pub use manifest::{Document, Manifest, ManifestError};
pub use operator::{Adapters, Operator, Stores};

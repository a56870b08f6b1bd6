//! PagerDuty REST API client and upstream adapters.
//!
//! [`PagerDutyClient`] speaks the v2 REST API: token authentication,
//! single-key request envelopes and status code mapping. [`RestAdapter`]
//! plugs it into the reconciler for every kind implementing [`RestResource`].
//!
//! # Example
//!
//! ```ignore
//! use pd_operator_core::PagerdutyServiceSpec;
//! use pd_operator_pagerduty::{PagerDutyClient, PagerDutyConfig, RestAdapter};
//!
//! let client = PagerDutyClient::new(&PagerDutyConfig::with_token("token"))?;
//! let services = RestAdapter::<PagerdutyServiceSpec>::new(client);
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;

pub use adapter::{RestAdapter, RestResource};
pub use client::{ACCEPT_V2, PagerDutyClient};
pub use config::{DEFAULT_BASE_URL, PagerDutyConfig};
pub use error::{Error, Result};

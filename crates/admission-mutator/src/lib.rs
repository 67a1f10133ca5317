//! A mutating admission webhook that adds a request for the block device resource to pods
//! created in selected namespaces.
//!
//! The webhook answers `POST /mutate` with an `AdmissionReview`. Pods in a namespace named by the
//! [`NamespacePolicy`] get a JSON patch requesting one unit of `power-dev-plugin/dev`. Every other
//! pod is allowed unchanged.
//!
//! # Example
//! ```rust,no_run
//! use admission_mutator::config::Config;
//! use admission_mutator::{server, NamespacePolicy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let policy = NamespacePolicy::discover(config.policy_file.as_deref())?;
//!     server::start(&config, policy, async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
mod error;
pub mod mutate;
pub mod policy;
pub mod review;
pub mod server;

pub use error::MalformedRequest;
pub use policy::NamespacePolicy;

//! A Kubernetes [device plugin](https://kubernetes.io/docs/concepts/extend-kubernetes/compute-storage-net/device-plugins/)
//! that advertises the block devices attached to a host as an extended resource.
//!
//! The crate provides the [`PluginServer`] which serves the device plugin gRPC API on a Unix
//! socket, registers itself with the kubelet, and streams the devices found by a
//! [`DeviceEnumerator`]. The [`lifecycle`] module sequences startup and signal-driven shutdown
//! for a plugin process.
//!
//! # Example
//! ```rust,no_run
//! use device_plugin::config::Config;
//! use device_plugin::enumerator::SysfsBlockScanner;
//! use device_plugin::lifecycle::{self, ShutdownSignals};
//! use device_plugin::PluginServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let scanner = SysfsBlockScanner::new(&config.sysfs_root);
//!     let server = PluginServer::new(config, scanner)?;
//!     let signals = ShutdownSignals::install()?;
//!     lifecycle::run(&server, signals).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod enumerator;
mod error;
pub mod grpc_sock;
pub mod lifecycle;
pub mod plugin;
pub mod registration;
pub(crate) mod resources;

/// Types generated from the kubelet device plugin protobuf definitions.
pub mod device_plugin_api {
    /// The `v1beta1` device plugin API.
    #[allow(missing_docs)]
    pub mod v1beta1 {
        /// Version of the device plugin API this crate was built against.
        pub const API_VERSION: &str = "v1beta1";
        tonic::include_proto!("v1beta1");
    }
}

pub use enumerator::DeviceEnumerator;
pub use error::PluginError;
#[doc(inline)]
pub use plugin::PluginServer;

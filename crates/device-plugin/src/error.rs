use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while running the device plugin.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin socket could not be bound.
    #[error("unable to bind plugin socket {}: {source}", path.display())]
    BindFailure {
        /// Socket path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// A stale socket file exists and could not be removed.
    #[error("unable to remove stale socket {}: {source}", path.display())]
    CleanupFailure {
        /// Socket path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// The freshly started server did not answer the self-connect probe.
    #[error("plugin server on {} did not answer the startup probe: {reason}", path.display())]
    ServerUnreachable {
        /// Socket path
        path: PathBuf,
        /// Why the probe failed
        reason: String,
    },
    /// The kubelet registration socket could not be dialed.
    #[error("unable to dial kubelet at {}: {source}", path.display())]
    DialFailure {
        /// Kubelet socket path
        path: PathBuf,
        /// Underlying transport error
        source: tonic::transport::Error,
    },
    /// The kubelet answered the registration request with an error.
    #[error("kubelet rejected registration of resource {resource}: {status}")]
    RegistrationRejected {
        /// The advertised resource name
        resource: String,
        /// Status returned by the kubelet
        status: tonic::Status,
    },
    /// Scanning the host for devices failed.
    #[error("device enumeration failed: {0:#}")]
    EnumerationFailure(anyhow::Error),
    /// `start` was called while a server session is still live.
    #[error("plugin server is already running")]
    AlreadyStarted,
    /// An operation needs a running server session.
    #[error("plugin server is not running")]
    NotStarted,
    /// The plugin configuration cannot be used.
    #[error("invalid plugin configuration: {0}")]
    InvalidConfig(String),
}

impl From<PluginError> for tonic::Status {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::EnumerationFailure(_) => tonic::Status::unavailable(e.to_string()),
            _ => tonic::Status::internal(e.to_string()),
        }
    }
}

//! A client/server implementation using UNIX sockets for gRPC, meant for use with tonic. Socket
//! support is not built in to tonic, so the server side is a [`futures::Stream`] of accepted
//! connections and the client side is a tonic [`Channel`](tonic::transport::Channel) built from a
//! custom connector.

#[path = "unix/mod.rs"]
pub mod server;

pub mod client;

use std::path::Path;

use tracing::{debug, trace};

use crate::PluginError;

/// Removes a socket file left over by a previous run. A missing file is not an error: a file at
/// the path says nothing about whether a server is still alive, and binding over it would fail
/// with "address in use".
pub fn cleanup<P: AsRef<Path>>(path: P) -> Result<(), PluginError> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(_) => {
            debug!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound) => {
            trace!(path = %path.display(), "No socket to clean up");
            Ok(())
        }
        Err(e) => Err(PluginError::CleanupFailure {
            path: path.to_owned(),
            source: e,
        }),
    }
}

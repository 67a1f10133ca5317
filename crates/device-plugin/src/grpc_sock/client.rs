//! Dialing a gRPC server listening on a Unix socket.
use std::path::Path;

use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

// Endpoint needs a URI even though the connector below never looks at it
const PLACEHOLDER_URI: &str = "http://[::]:50051";

/// Connects to the socket at `path` and returns a channel for a tonic generated client
/// (`DevicePluginClient::new(channel)` rather than `DevicePluginClient::connect`).
///
/// Fails if nothing is listening on `path`.
pub async fn socket_channel<P: AsRef<Path>>(path: P) -> Result<Channel, tonic::transport::Error> {
    let socket = path.as_ref().to_owned();
    Endpoint::from_static(PLACEHOLDER_URI)
        .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(socket.clone())))
        .await
}

//! The registration handshake with the kubelet's device plugin manager.
use std::path::Path;

use tonic::Request;
use tracing::{debug, instrument};

use crate::device_plugin_api::v1beta1::{
    registration_client::RegistrationClient, DevicePluginOptions, RegisterRequest, API_VERSION,
};
use crate::grpc_sock;
use crate::PluginError;

/// Options this plugin advertises, both at registration and from `GetDevicePluginOptions`. No
/// pre-start hook and no preferred allocation.
pub fn plugin_options() -> DevicePluginOptions {
    DevicePluginOptions {
        pre_start_required: false,
        get_preferred_allocation_available: false,
    }
}

/// Registers a device plugin with the kubelet listening on `kubelet_socket`. `endpoint` is the
/// file name of the plugin socket, which the kubelet resolves within its own plugin directory.
///
/// The connection only lives for the duration of the call. Failures are not retried.
#[instrument(level = "debug", skip(kubelet_socket), fields(kubelet_socket = %kubelet_socket.as_ref().display()))]
pub async fn register<P: AsRef<Path>>(
    kubelet_socket: P,
    endpoint: &str,
    resource_name: &str,
) -> Result<(), PluginError> {
    let kubelet_socket = kubelet_socket.as_ref();
    let channel = grpc_sock::client::socket_channel(kubelet_socket)
        .await
        .map_err(|source| PluginError::DialFailure {
            path: kubelet_socket.to_owned(),
            source,
        })?;
    let mut client = RegistrationClient::new(channel);
    let request = Request::new(RegisterRequest {
        version: API_VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: Some(plugin_options()),
    });
    client
        .register(request)
        .await
        .map_err(|status| PluginError::RegistrationRejected {
            resource: resource_name.to_string(),
            status,
        })?;
    debug!("Registered with kubelet");
    Ok(())
}

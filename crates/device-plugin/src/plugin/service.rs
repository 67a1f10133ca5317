//! The `DevicePlugin` gRPC service served on the plugin socket.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, trace};

use super::inventory::{HealthEvent, Inventory};
use super::PluginState;
use crate::device_plugin_api::v1beta1::{
    device_plugin_server::DevicePlugin, AllocateRequest, AllocateResponse,
    ContainerAllocateResponse, ContainerPreferredAllocationResponse, Device, DeviceSpec,
    DevicePluginOptions, Empty, ListAndWatchResponse, PreStartContainerRequest,
    PreStartContainerResponse, PreferredAllocationRequest, PreferredAllocationResponse,
};
use crate::enumerator::DeviceEnumerator;
use crate::registration::plugin_options;
use crate::PluginError;

/// Messages buffered per ListAndWatch stream before the worker waits on the kubelet
const LIST_AND_WATCH_BUFFER: usize = 4;

/// Cgroup permissions granted on every allocated device. Containers read and write the device but
/// may not create device nodes (`m`).
const DEVICE_PERMISSIONS: &str = "rw";

/// State shared between the plugin server and every session's service instance.
pub(crate) struct Shared<E> {
    enumerator: Arc<E>,
    pub(crate) inventory: RwLock<Inventory>,
    health_receiver: Mutex<mpsc::Receiver<HealthEvent>>,
    device_dir: PathBuf,
    state: RwLock<PluginState>,
}

impl<E: DeviceEnumerator> Shared<E> {
    pub(crate) fn new(
        enumerator: E,
        health_receiver: mpsc::Receiver<HealthEvent>,
        device_dir: &Path,
    ) -> Self {
        Shared {
            enumerator: Arc::new(enumerator),
            inventory: RwLock::new(Inventory::default()),
            health_receiver: Mutex::new(health_receiver),
            device_dir: device_dir.to_owned(),
            state: RwLock::new(PluginState::Created),
        }
    }

    /// Runs one scan on the blocking pool
    pub(crate) async fn scan(&self) -> Result<Vec<String>, PluginError> {
        let enumerator = Arc::clone(&self.enumerator);
        tokio::task::spawn_blocking(move || enumerator.scan())
            .await
            .map_err(|e| PluginError::EnumerationFailure(anyhow::Error::new(e)))?
            .map_err(PluginError::EnumerationFailure)
    }

    pub(crate) async fn state(&self) -> PluginState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: PluginState) {
        let mut current = self.state.write().await;
        trace!(from = %*current, to = %state, "Plugin state transition");
        *current = state;
    }

    /// Moves to `to` only when the current state is one of `from`
    pub(crate) async fn transition(&self, from: &[PluginState], to: PluginState) {
        let mut current = self.state.write().await;
        if from.contains(&*current) {
            trace!(from = %*current, to = %to, "Plugin state transition");
            *current = to;
        }
    }

    /// Returns the current records, scanning once first if the inventory is empty
    async fn current_records(&self) -> Result<Vec<Device>, PluginError> {
        if self.inventory.read().await.is_empty() {
            let devices = self.scan().await?;
            info!(count = devices.len(), "Updating the devices");
            self.inventory.write().await.replace(devices);
        }
        Ok(self.inventory.read().await.records())
    }

    async fn next_health_event(&self) -> Option<HealthEvent> {
        self.health_receiver.lock().await.recv().await
    }

    fn device_specs(&self, devices: &[String]) -> Vec<DeviceSpec> {
        devices
            .iter()
            .map(|name| {
                let path = self.device_dir.join(name).to_string_lossy().into_owned();
                DeviceSpec {
                    container_path: path.clone(),
                    host_path: path,
                    permissions: DEVICE_PERMISSIONS.to_string(),
                }
            })
            .collect()
    }
}

/// One session's view of the plugin. Streams opened through it end when `stop` is cancelled.
pub(crate) struct BlockDevicePlugin<E> {
    shared: Arc<Shared<E>>,
    stop: CancellationToken,
}

impl<E> BlockDevicePlugin<E> {
    pub(crate) fn new(shared: Arc<Shared<E>>, stop: CancellationToken) -> Self {
        BlockDevicePlugin { shared, stop }
    }
}

#[async_trait::async_trait]
impl<E: DeviceEnumerator> DevicePlugin for BlockDevicePlugin<E> {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(plugin_options()))
    }

    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    #[instrument(level = "debug", skip(self, _request))]
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        let devices = self.shared.current_records().await?;
        debug!(?devices, "Sending initial device list");
        self.shared
            .transition(
                &[PluginState::Started, PluginState::Registered],
                PluginState::Serving,
            )
            .await;

        let (sender, receiver) = mpsc::channel(LIST_AND_WATCH_BUFFER);
        sender
            .send(Ok(ListAndWatchResponse { devices }))
            .await
            .map_err(|_| Status::internal("ListAndWatch stream closed before it was returned"))?;
        tokio::spawn(watch(
            Arc::clone(&self.shared),
            self.stop.clone(),
            sender,
        ));
        Ok(Response::new(ReceiverStream::new(receiver)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> Result<Response<PreferredAllocationResponse>, Status> {
        // Not advertised in the plugin options, so the kubelet never calls this. Answer with no
        // preference for each container.
        let container_responses = request
            .into_inner()
            .container_requests
            .iter()
            .map(|_| ContainerPreferredAllocationResponse::default())
            .collect();
        Ok(Response::new(PreferredAllocationResponse {
            container_responses,
        }))
    }

    #[instrument(level = "info", skip(self, request))]
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let request = request.into_inner();
        // Devices come and go between ListAndWatch updates, so always rescan
        let devices = self.shared.scan().await?;
        let container_responses = request
            .container_requests
            .iter()
            .map(|container_request| {
                // Every container is granted every device, not just the IDs it asked for
                debug!(requested = ?container_request.devices_i_ds, granted = ?devices, "Container requests devices");
                ContainerAllocateResponse {
                    devices: self.shared.device_specs(&devices),
                    ..Default::default()
                }
            })
            .collect::<Vec<_>>();
        info!(
            containers = container_responses.len(),
            devices = devices.len(),
            "Allocated devices"
        );
        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        // No per-container setup is needed before first use
        Ok(Response::new(PreStartContainerResponse {}))
    }
}

/// Streams the full device list to one watcher every time a health event arrives. Ends when the
/// session stops or the watcher goes away, never on its own.
async fn watch<E: DeviceEnumerator>(
    shared: Arc<Shared<E>>,
    stop: CancellationToken,
    sender: mpsc::Sender<Result<ListAndWatchResponse, Status>>,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!("Told to stop, closing ListAndWatch stream");
                return;
            }
            _ = sender.closed() => {
                debug!("Watcher disconnected from ListAndWatch stream");
                return;
            }
            event = shared.next_health_event() => {
                let event = match event {
                    Some(event) => event,
                    None => {
                        // Every reporter is gone, only a stop or disconnect can end the stream now
                        tokio::select! {
                            _ = stop.cancelled() => {},
                            _ = sender.closed() => {},
                        }
                        return;
                    }
                };
                debug!(device_id = %event.device_id, health = %event.health, "Checking the health");
                let devices = {
                    let mut inventory = shared.inventory.write().await;
                    inventory.apply(&event);
                    inventory.records()
                };
                if sender.send(Ok(ListAndWatchResponse { devices })).await.is_err() {
                    debug!("Watcher disconnected from ListAndWatch stream");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::inventory::{HEALTHY, UNHEALTHY};
    use super::*;
    use crate::device_plugin_api::v1beta1::ContainerAllocateRequest;
    use tokio_stream::StreamExt;

    fn plugin_with<E: DeviceEnumerator>(
        enumerator: E,
    ) -> (
        BlockDevicePlugin<E>,
        mpsc::Sender<HealthEvent>,
        CancellationToken,
    ) {
        let (health_sender, health_receiver) = mpsc::channel(1);
        let shared = Arc::new(Shared::new(enumerator, health_receiver, Path::new("/dev")));
        let stop = CancellationToken::new();
        (
            BlockDevicePlugin::new(shared, stop.clone()),
            health_sender,
            stop,
        )
    }

    fn fixed(names: &'static [&'static str]) -> impl DeviceEnumerator {
        move || -> anyhow::Result<Vec<String>> { Ok(names.iter().map(|n| n.to_string()).collect()) }
    }

    fn failing() -> impl DeviceEnumerator {
        || -> anyhow::Result<Vec<String>> { Err(anyhow::anyhow!("no block devices for you")) }
    }

    #[tokio::test]
    async fn options_are_static() {
        let (plugin, _, _) = plugin_with(fixed(&[]));
        let options = plugin
            .get_device_plugin_options(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert!(!options.pre_start_required);
        assert!(!options.get_preferred_allocation_available);
    }

    #[tokio::test]
    async fn list_and_watch_scans_empty_inventory() {
        let (plugin, _, _) = plugin_with(fixed(&["sda1", "sda", "sdb"]));
        let mut stream = plugin
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first.devices.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["0", "1", "2"]
        );
        assert!(first.devices.iter().all(|d| d.health == HEALTHY));
    }

    #[tokio::test]
    async fn list_and_watch_fails_when_scan_fails() {
        let (plugin, _, _) = plugin_with(failing());
        let status = plugin
            .list_and_watch(Request::new(Empty {}))
            .await
            .expect_err("scan failure should fail the stream");
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn health_events_re_emit_full_list() {
        let (plugin, health, _) = plugin_with(fixed(&["sda", "sdb", "sdc"]));
        let mut stream = plugin
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        stream.next().await.unwrap().unwrap();

        health.send(HealthEvent::unhealthy("1")).await.unwrap();
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.devices.len(), 3);
        assert_eq!(update.devices[1].health, UNHEALTHY);

        // A later event for another device still reports the first one as unhealthy
        health.send(HealthEvent::unhealthy("2")).await.unwrap();
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.devices[0].health, HEALTHY);
        assert_eq!(update.devices[1].health, UNHEALTHY);
        assert_eq!(update.devices[2].health, UNHEALTHY);
    }

    #[tokio::test]
    async fn stop_ends_stream_without_error() {
        let (plugin, _, stop) = plugin_with(fixed(&["sda"]));
        let mut stream = plugin
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        stream.next().await.unwrap().unwrap();
        stop.cancel();
        // Cancelling twice is harmless
        stop.cancel();
        let end = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end promptly after stop");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn allocate_grants_every_device_to_every_container() {
        let (plugin, _, _) = plugin_with(fixed(&["sda", "sdb"]));
        let request = AllocateRequest {
            container_requests: vec![
                ContainerAllocateRequest {
                    devices_i_ds: vec!["0".to_string()],
                },
                ContainerAllocateRequest {
                    devices_i_ds: vec!["1".to_string()],
                },
            ],
        };
        let response = plugin
            .allocate(Request::new(request))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.container_responses.len(), 2);
        for container in response.container_responses {
            let paths: Vec<_> = container
                .devices
                .iter()
                .map(|d| (d.host_path.as_str(), d.container_path.as_str()))
                .collect();
            assert_eq!(paths, vec![("/dev/sda", "/dev/sda"), ("/dev/sdb", "/dev/sdb")]);
            assert!(container.devices.iter().all(|d| d.permissions == "rw"));
        }
    }

    #[tokio::test]
    async fn allocate_propagates_scan_failure() {
        let (plugin, _, _) = plugin_with(failing());
        let request = AllocateRequest {
            container_requests: vec![ContainerAllocateRequest::default()],
        };
        let status = plugin
            .allocate(Request::new(request))
            .await
            .expect_err("allocate should fail when the scan fails");
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(status.message().contains("no block devices for you"));
    }

    #[tokio::test]
    async fn pre_start_is_a_no_op() {
        let (plugin, _, _) = plugin_with(fixed(&[]));
        plugin
            .pre_start_container(Request::new(PreStartContainerRequest {
                devices_ids: vec!["0".to_string()],
            }))
            .await
            .unwrap();
    }
}

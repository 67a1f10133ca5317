//! The device plugin server. A [`PluginServer`] owns the plugin socket, serves the `DevicePlugin`
//! gRPC service on it and registers itself with the kubelet.
//!
//! A server moves through the following states:
//!
//! ```text
//! Created -> Started -> Registered -> Serving -> Stopping -> Stopped
//! ```
//!
//! `Started` means the socket is bound and the server answered a self-connect probe.
//! `Registered` means the kubelet accepted the registration request and `Serving` that the kubelet
//! opened a `ListAndWatch` stream. Any state can be stopped, which tears the session down and
//! removes the socket. A stopped server can be started again.
pub mod inventory;
mod service;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::Config;
use crate::device_plugin_api::v1beta1::{
    device_plugin_client::DevicePluginClient, device_plugin_server::DevicePluginServer, Empty,
};
use crate::enumerator::DeviceEnumerator;
use crate::{grpc_sock, registration, PluginError};
pub use inventory::{Health, HealthEvent};
use service::{BlockDevicePlugin, Shared};

/// Where a [`PluginServer`] is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginState {
    /// Constructed, never started
    Created,
    /// Socket bound and answering
    Started,
    /// Accepted by the kubelet
    Registered,
    /// The kubelet is watching the device list
    Serving,
    /// Teardown in progress
    Stopping,
    /// Torn down, socket removed
    Stopped,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sends health changes to the `ListAndWatch` streams of a [`PluginServer`]. Each event goes to
/// the next `ListAndWatch` worker to receive it, not to every open stream. The queue holds a
/// single event, so `report` waits until a worker has picked up the previous one.
#[derive(Clone, Debug)]
pub struct HealthReporter {
    sender: mpsc::Sender<HealthEvent>,
}

impl HealthReporter {
    /// Queues `event`. Fails only once the plugin server is gone.
    pub async fn report(
        &self,
        event: HealthEvent,
    ) -> Result<(), mpsc::error::SendError<HealthEvent>> {
        self.sender.send(event).await
    }
}

/// A live server: the serving task and the token that ends it
struct Session {
    stop: CancellationToken,
    server_task: JoinHandle<()>,
}

/// Serves the device plugin API for the block devices found by a [`DeviceEnumerator`].
pub struct PluginServer<E> {
    config: Config,
    shared: Arc<Shared<E>>,
    health: HealthReporter,
    session: Mutex<Option<Session>>,
}

impl<E: DeviceEnumerator> PluginServer<E> {
    /// Creates a server for `config`, failing if the configuration cannot be registered.
    pub fn new(config: Config, enumerator: E) -> Result<Self, PluginError> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(1);
        Ok(PluginServer {
            shared: Arc::new(Shared::new(enumerator, receiver, &config.device_dir)),
            config,
            health: HealthReporter { sender },
            session: Mutex::new(None),
        })
    }

    /// The configuration this server runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current lifecycle state
    pub async fn state(&self) -> PluginState {
        self.shared.state().await
    }

    /// Returns a handle for reporting device health changes. Nothing inside the plugin reports
    /// health on its own.
    pub fn health_reporter(&self) -> HealthReporter {
        self.health.clone()
    }

    /// The device names found by the most recent inventory refresh
    pub async fn devices(&self) -> Vec<String> {
        self.shared.inventory.read().await.devices().to_vec()
    }

    /// Starts the server and registers it with the kubelet. If registration fails the server is
    /// stopped again before the error is returned, so a rejected plugin never stays listening.
    pub async fn serve(&self) -> Result<(), PluginError> {
        self.start().await?;
        info!(socket = %self.config.socket_path().display(), "Starting to serve");

        if let Err(e) = self.register().await {
            error!(error = %e, "Could not register device plugin");
            if let Err(stop_err) = self.stop().await {
                warn!(error = %stop_err, "Unable to stop device plugin after failed registration");
            }
            return Err(e);
        }
        info!(resource = %self.config.resource_name, "Registered device plugin with kubelet");
        Ok(())
    }

    /// Scans for devices, binds the plugin socket and starts serving on it. Returns once the
    /// server has answered a request on its own socket.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&self) -> Result<(), PluginError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(PluginError::AlreadyStarted);
        }

        let devices = self.shared.scan().await?;
        info!(?devices, "Initializing the devices recorded with the plugin");
        self.shared.inventory.write().await.reset(devices);

        let socket = grpc_sock::server::Socket::bind(&self.config.socket_path())?;
        let stop = CancellationToken::new();
        let service = BlockDevicePlugin::new(Arc::clone(&self.shared), stop.clone());
        let shutdown = stop.clone();
        let server_task = tokio::spawn(async move {
            let serv = Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(socket, shutdown.cancelled());
            if let Err(e) = serv.await {
                error!(error = %e, "Serving incoming requests failed");
            }
        });
        let started = Session { stop, server_task };
        self.shared.set_state(PluginState::Started).await;

        if let Err(e) = self.probe().await {
            error!(error = %e, "Plugin server is not answering, stopping");
            if let Err(stop_err) = self.teardown(started).await {
                warn!(error = %stop_err, "Unable to clean up after failed start");
            }
            return Err(e);
        }
        *session = Some(started);
        Ok(())
    }

    /// Registers this plugin's socket and resource with the kubelet.
    pub async fn register(&self) -> Result<(), PluginError> {
        if self.session.lock().await.is_none() {
            return Err(PluginError::NotStarted);
        }
        registration::register(
            &self.config.kubelet_socket,
            &self.config.socket_name,
            &self.config.resource_name,
        )
        .await?;
        // The kubelet may already have opened ListAndWatch while handling the registration
        self.shared
            .transition(&[PluginState::Started], PluginState::Registered)
            .await;
        Ok(())
    }

    /// Stops serving, ends every `ListAndWatch` stream and removes the plugin socket. Stopping a
    /// server that is not running does nothing.
    pub async fn stop(&self) -> Result<(), PluginError> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => self.teardown(session).await,
            None => {
                trace!("Plugin server is not running, nothing to stop");
                Ok(())
            }
        }
    }

    async fn teardown(&self, session: Session) -> Result<(), PluginError> {
        self.shared.set_state(PluginState::Stopping).await;
        session.stop.cancel();

        let mut server_task = session.server_task;
        if tokio::time::timeout(self.config.shutdown_grace_period, &mut server_task)
            .await
            .is_err()
        {
            warn!(
                grace_period = ?self.config.shutdown_grace_period,
                "Plugin server did not shut down in time, aborting it"
            );
            server_task.abort();
            // The only possible error is the cancellation we just asked for
            let _ = server_task.await;
        }

        let cleanup = grpc_sock::cleanup(self.config.socket_path());
        self.shared.set_state(PluginState::Stopped).await;
        debug!("Plugin server stopped");
        cleanup
    }

    /// Asks the freshly started server for its options over its own socket
    async fn probe(&self) -> Result<(), PluginError> {
        let path = self.config.socket_path();
        let unreachable = |reason: String| PluginError::ServerUnreachable {
            path: path.clone(),
            reason,
        };
        let call = async {
            let channel = grpc_sock::client::socket_channel(&path)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            DevicePluginClient::new(channel)
                .get_device_plugin_options(Empty {})
                .await
                .map_err(|status| unreachable(status.to_string()))?;
            Ok::<(), PluginError>(())
        };
        match tokio::time::timeout(self.config.probe_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(unreachable(format!(
                "no answer within {:?}",
                self.config.probe_timeout
            ))),
        }
    }
}

//! Startup and signal-driven shutdown of a device plugin process.
//!
//! [`run`] serves the plugin, waits for one of the termination signals registered by
//! [`ShutdownSignals::install`], stops the plugin and runs the application shutdown hook. The
//! returned [`ExitStatus`] carries the process exit code. [`run_until`] does the same with any
//! future standing in for the signal.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn};

use crate::enumerator::DeviceEnumerator;
use crate::PluginServer;

static SIGNALS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// How a plugin process ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shut down after a termination signal
    Clean,
    /// The plugin server could not be constructed
    ConstructionFailure,
    /// Serving or registering with the kubelet failed
    ServeFailure,
}

impl ExitStatus {
    /// The process exit code for this status
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::ConstructionFailure => 2,
            ExitStatus::ServeFailure => 3,
        }
    }
}

/// Listeners for SIGHUP, SIGINT, SIGTERM and SIGQUIT. Only one set can be installed per process.
pub struct ShutdownSignals {
    listeners: Vec<(&'static str, Signal)>,
}

impl ShutdownSignals {
    /// Registers the termination signal listeners. Must be called from within a tokio runtime.
    pub fn install() -> anyhow::Result<Self> {
        if SIGNALS_INSTALLED.swap(true, Ordering::SeqCst) {
            anyhow::bail!("shutdown signal listeners are already installed");
        }
        let kinds = [
            ("SIGHUP", SignalKind::hangup()),
            ("SIGINT", SignalKind::interrupt()),
            ("SIGTERM", SignalKind::terminate()),
            ("SIGQUIT", SignalKind::quit()),
        ];
        let mut listeners = Vec::with_capacity(kinds.len());
        for (name, kind) in kinds {
            match signal(kind) {
                Ok(listener) => listeners.push((name, listener)),
                Err(e) => {
                    SIGNALS_INSTALLED.store(false, Ordering::SeqCst);
                    return Err(anyhow::Error::new(e)
                        .context(format!("unable to listen for {}", name)));
                }
            }
        }
        Ok(ShutdownSignals { listeners })
    }

    /// Waits for the first of the registered signals and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        let waits = self.listeners.iter_mut().map(|(name, listener)| {
            let name = *name;
            Box::pin(async move {
                listener.recv().await;
                name
            })
        });
        let (name, _, _) = futures::future::select_all(waits).await;
        name
    }
}

/// Serves `server` until a termination signal arrives, then stops it.
///
/// Returns [`ExitStatus::ServeFailure`] without waiting for a signal if the server cannot be
/// started or registered. A server that was rejected by the kubelet has already been stopped.
pub async fn run<E: DeviceEnumerator>(
    server: &PluginServer<E>,
    mut signals: ShutdownSignals,
) -> ExitStatus {
    run_until(server, async move { signals.recv().await }).await
}

/// Like [`run`], but shuts down once `shutdown` resolves to the name of the signal that asked for
/// it. `shutdown` is not polled until the server is serving.
pub async fn run_until<E, S>(server: &PluginServer<E>, shutdown: S) -> ExitStatus
where
    E: DeviceEnumerator,
    S: Future<Output = &'static str>,
{
    if let Err(e) = server.serve().await {
        error!(error = %e, "Device plugin failed to start");
        return ExitStatus::ServeFailure;
    }

    let caught = shutdown.await;
    warn!(signal = caught, "Caught shutdown signal, stopping device plugin");
    if let Err(e) = server.stop().await {
        // The process is exiting either way
        error!(error = %e, "Device plugin did not stop cleanly");
    }
    app_shutdown();
    info!("Device plugin shut down");
    ExitStatus::Clean
}

/// Application shutdown hook, run after the plugin server has stopped. Does nothing yet.
pub fn app_shutdown() {}

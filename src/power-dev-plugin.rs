use device_plugin::config::Config;
use device_plugin::enumerator::SysfsBlockScanner;
use device_plugin::lifecycle::{self, ExitStatus, ShutdownSignals};
use device_plugin::PluginServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let status = run(Config::new_from_flags(env!("CARGO_PKG_VERSION"))).await;
    std::process::exit(status.code());
}

async fn run(config: Config) -> ExitStatus {
    info!(
        socket = %config.socket_path().display(),
        kubelet_socket = %config.kubelet_socket.display(),
        resource = %config.resource_name,
        "Starting power-dev-plugin"
    );
    let scanner = SysfsBlockScanner::new(&config.sysfs_root);
    let server = match PluginServer::new(config, scanner) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Unable to create device plugin");
            return ExitStatus::ConstructionFailure;
        }
    };
    let signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!(error = %e, "Unable to listen for shutdown signals");
            return ExitStatus::ConstructionFailure;
        }
    };
    lifecycle::run(&server, signals).await
}

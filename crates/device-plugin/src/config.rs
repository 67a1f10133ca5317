//! Configuration for the device plugin
//!
//! Use [`Config::default`] for the standard kubelet paths or turn on the "cli" feature and use
//! [`Config::new_from_flags`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::resources::validate_extended_resource_name;
use crate::PluginError;

/// Directory the kubelet watches for device plugin sockets
pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins/";
/// Name of the kubelet's registration socket inside the plugin directory
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";
const DEFAULT_SOCKET_NAME: &str = "power-dev.csi.ibm.com-reg.sock";
const DEFAULT_RESOURCE_NAME: &str = "power-dev-plugin/dev";
const DEFAULT_DEVICE_DIR: &str = "/dev";
const DEFAULT_SYSFS_ROOT: &str = "/sys";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// The configuration needed for the device plugin to run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the plugin socket
    pub plugin_dir: PathBuf,
    /// File name of the plugin socket. This is what gets sent to the kubelet at registration,
    /// which resolves it inside its own plugin directory.
    pub socket_name: String,
    /// Full path of the kubelet registration socket
    pub kubelet_socket: PathBuf,
    /// Extended resource name to advertise
    pub resource_name: String,
    /// Directory device nodes are found in, on the host and in containers
    pub device_dir: PathBuf,
    /// Root of the sysfs tree scanned for block devices
    pub sysfs_root: PathBuf,
    /// How long the startup self-connect probe may take
    pub probe_timeout: Duration,
    /// How long `stop` waits for the server to drain before aborting it
    pub shutdown_grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let plugin_dir = PathBuf::from(DEFAULT_PLUGIN_DIR);
        Config {
            kubelet_socket: plugin_dir.join(KUBELET_SOCKET_NAME),
            plugin_dir,
            socket_name: DEFAULT_SOCKET_NAME.to_owned(),
            resource_name: DEFAULT_RESOURCE_NAME.to_owned(),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            shutdown_grace_period: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

impl Config {
    /// Returns a default config whose plugin and kubelet sockets live in `plugin_dir`.
    pub fn with_plugin_dir<P: AsRef<Path>>(plugin_dir: P) -> Self {
        let plugin_dir = plugin_dir.as_ref().to_owned();
        Config {
            kubelet_socket: plugin_dir.join(KUBELET_SOCKET_NAME),
            plugin_dir,
            ..Default::default()
        }
    }

    /// Full path of the plugin socket
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.socket_name)
    }

    /// Checks the values the kubelet would otherwise reject at registration time.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.socket_name.is_empty() {
            return Err(PluginError::InvalidConfig(
                "socket name must not be empty".to_string(),
            ));
        }
        if Path::new(&self.socket_name).file_name() != Some(OsStr::new(&self.socket_name)) {
            return Err(PluginError::InvalidConfig(format!(
                "socket name {} must be a bare file name inside the plugin directory",
                self.socket_name
            )));
        }
        if self.socket_path() == self.kubelet_socket {
            return Err(PluginError::InvalidConfig(format!(
                "plugin socket must not be the kubelet socket {}",
                self.kubelet_socket.display()
            )));
        }
        validate_extended_resource_name(&self.resource_name).map_err(PluginError::InvalidConfig)
    }

    /// Parses all command line flags and sets the proper defaults. The version of your
    /// application should be passed to set the proper version for the CLI
    #[cfg(feature = "cli")]
    pub fn new_from_flags(version: &str) -> Self {
        let app = Opts::clap().version(version);
        let opts = Opts::from_clap(&app.get_matches());
        opts.into()
    }
}

/// CLI options that can be configured for the device plugin
#[derive(StructOpt, Clone, Debug)]
#[cfg(feature = "cli")]
#[structopt(
    name = "power-dev-plugin",
    about = "Advertises host block devices to the kubelet"
)]
pub struct Opts {
    #[structopt(
        long = "plugin-dir",
        default_value = "/var/lib/kubelet/device-plugins/",
        env = "POWER_DEV_PLUGIN_DIR",
        help = "The directory the kubelet watches for device plugin sockets"
    )]
    plugin_dir: PathBuf,

    #[structopt(
        long = "socket-name",
        default_value = "power-dev.csi.ibm.com-reg.sock",
        env = "POWER_DEV_SOCKET_NAME",
        help = "File name of the plugin socket inside the plugin directory"
    )]
    socket_name: String,

    #[structopt(
        long = "kubelet-socket",
        env = "POWER_DEV_KUBELET_SOCKET",
        help = "Path of the kubelet registration socket. Defaults to kubelet.sock in the plugin directory"
    )]
    kubelet_socket: Option<PathBuf>,

    #[structopt(
        long = "resource-name",
        default_value = "power-dev-plugin/dev",
        env = "POWER_DEV_RESOURCE_NAME",
        help = "The extended resource name to advertise"
    )]
    resource_name: String,

    #[structopt(
        long = "device-dir",
        default_value = "/dev",
        env = "POWER_DEV_DEVICE_DIR",
        help = "Directory holding the device nodes handed to containers"
    )]
    device_dir: PathBuf,

    #[structopt(
        long = "sysfs-root",
        default_value = "/sys",
        env = "POWER_DEV_SYSFS_ROOT",
        help = "Root of the sysfs tree to scan for block devices (e.g. a host mount)"
    )]
    sysfs_root: PathBuf,

    #[structopt(
        long = "probe-timeout-ms",
        default_value = "1000",
        env = "POWER_DEV_PROBE_TIMEOUT_MS",
        help = "How long the startup self-connect probe may take, in milliseconds"
    )]
    probe_timeout_ms: u64,

    #[structopt(
        long = "shutdown-grace-ms",
        default_value = "2000",
        env = "POWER_DEV_SHUTDOWN_GRACE_MS",
        help = "How long shutdown waits for open connections, in milliseconds"
    )]
    shutdown_grace_ms: u64,
}

#[cfg(feature = "cli")]
impl From<Opts> for Config {
    fn from(opts: Opts) -> Self {
        let kubelet_socket = opts
            .kubelet_socket
            .unwrap_or_else(|| opts.plugin_dir.join(KUBELET_SOCKET_NAME));
        Config {
            plugin_dir: opts.plugin_dir,
            socket_name: opts.socket_name,
            kubelet_socket,
            resource_name: opts.resource_name,
            device_dir: opts.device_dir,
            sysfs_root: opts.sysfs_root,
            probe_timeout: Duration::from_millis(opts.probe_timeout_ms),
            shutdown_grace_period: Duration::from_millis(opts.shutdown_grace_ms),
        }
    }
}

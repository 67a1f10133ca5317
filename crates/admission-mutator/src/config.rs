//! Configuration for the admission webhook server
//!
//! Use [`Config::default`] for a plain HTTP listener on port 8080 or turn on the "cli" feature and
//! use [`Config::new_from_flags`].
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[cfg(feature = "cli")]
use structopt::StructOpt;

const DEFAULT_PORT: u16 = 8080;

/// The configuration needed to run the webhook
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to listen on
    pub addr: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// TLS certificate. TLS is served only when both this and `private_key_file` are set.
    pub cert_file: Option<PathBuf>,
    /// TLS private key
    pub private_key_file: Option<PathBuf>,
    /// Policy file to load instead of searching the default locations
    pub policy_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            cert_file: None,
            private_key_file: None,
            policy_file: None,
        }
    }
}

impl Config {
    /// The socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Certificate and key paths, when both are configured
    pub fn tls_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert_file.as_ref().zip(self.private_key_file.as_ref())
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

/// CLI options that can be configured for the webhook
#[derive(StructOpt, Clone, Debug)]
#[cfg(feature = "cli")]
#[structopt(
    name = "power-dev-mutate",
    about = "Mutates the resource requests of pods in specific namespaces"
)]
pub struct Opts {
    #[structopt(
        long = "addr",
        default_value = "0.0.0.0",
        env = "POWER_DEV_MUTATE_ADDRESS",
        help = "The address the webhook listens on"
    )]
    addr: IpAddr,

    #[structopt(
        long = "port",
        default_value = "8080",
        env = "POWER_DEV_MUTATE_PORT",
        help = "The port the webhook listens on"
    )]
    port: u16,

    #[structopt(
        long = "tls-cert-file",
        env = "POWER_DEV_MUTATE_TLS_CERTIFICATE_FILE",
        requires = "private_key_file",
        help = "The path to the TLS certificate. Serves plain HTTP when unset"
    )]
    cert_file: Option<PathBuf>,

    #[structopt(
        long = "tls-private-key-file",
        env = "POWER_DEV_MUTATE_PRIVATE_KEY_FILE",
        requires = "cert_file",
        help = "The path to the private key for the TLS certificate"
    )]
    private_key_file: Option<PathBuf>,

    #[structopt(
        long = "config",
        env = "POWER_DEV_MUTATE_CONFIG",
        help = "Policy file to load. Defaults to the first config.yaml found in /etc/power-dev-mutate, $HOME/.power-dev-mutate and the working directory"
    )]
    policy_file: Option<PathBuf>,
}

#[cfg(feature = "cli")]
impl From<Opts> for Config {
    fn from(opts: Opts) -> Self {
        Config {
            addr: opts.addr,
            port: opts.port,
            cert_file: opts.cert_file,
            private_key_file: opts.private_key_file,
            policy_file: opts.policy_file,
        }
    }
}

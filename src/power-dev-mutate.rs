use admission_mutator::config::Config;
use admission_mutator::{server, NamespacePolicy};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new_from_flags(env!("CARGO_PKG_VERSION"));
    let policy = NamespacePolicy::discover(config.policy_file.as_deref())
        .context("config file didn't load successfully")?;
    let shutdown = server::shutdown_signal()?;
    server::start(&config, policy, shutdown).await
}

use std::path::PathBuf;

use device_plugin::enumerator::{DeviceEnumerator, SysfsBlockScanner};
use structopt::StructOpt;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Prints the block devices the device plugin would advertise
#[derive(StructOpt, Debug)]
#[structopt(name = "power-dev-scanner")]
struct Opts {
    #[structopt(
        long = "sysfs-root",
        default_value = "/sys",
        env = "POWER_DEV_SYSFS_ROOT",
        help = "Root of the sysfs tree to scan for block devices (e.g. a host mount)"
    )]
    sysfs_root: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::from_args();
    let devices = match SysfsBlockScanner::new(&opts.sysfs_root).scan() {
        Ok(devices) => devices,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Could not scan devices, aborting");
            std::process::exit(2);
        }
    };
    for (idx, device) in devices.iter().enumerate() {
        println!("{} - {}", idx, device);
    }
}

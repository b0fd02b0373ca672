//! drishti-iod: tracking device daemon
//!
//! Samples a device source at a fixed rate and serves the state to TCP
//! clients. Runs until interrupted.

use clap::Parser;
use drishti_io::{DaemonConfig, DeviceServer, DeviceSource, Error, MockSource, Result};
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "drishti-iod", about = "Tracking device daemon")]
struct Args {
    /// Path to a TOML configuration file (defaults apply if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    let layout = config.device.layout();
    let server = DeviceServer::bind(&config.network.listen, layout)?;

    let interrupt = server.handle();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        interrupt.stop();
    })
    .map_err(|e| Error::Other(format!("Failed to set signal handler: {}", e)))?;

    let period = Duration::from_secs_f64(1.0 / config.device.update_rate_hz.max(1.0));
    let publisher = server.handle();
    let sampler = thread::Builder::new()
        .name("drishti-sampler".to_string())
        .spawn(move || {
            let mut source = MockSource::new(layout);
            while publisher.is_running() {
                publisher.publish(source.sample());
                thread::sleep(period);
            }
        })?;

    server.run()?;
    if sampler.join().is_err() {
        return Err(Error::Other("Sampling thread panicked".to_string()));
    }
    info!("Daemon stopped");
    Ok(())
}

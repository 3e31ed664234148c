//! Entry point for the zlock demo.
//!
//! Starts `--hosts` simulated hosts, each with its own coordination session,
//! and lets them take turns holding the lock for `--hold-secs` seconds.

use tracing::{error, info};
use zlock_cli::{
    demo::{self, DemoSettings},
    model::Configuration,
    startup,
};
use zlock_coordination::MemoryCoordinationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let logging_config = configuration.logging_config();
    let _logging_guard = startup::init_logging(&logging_config)?;

    zlock_recipe::metrics::init_metrics();

    let settings = DemoSettings {
        hosts: configuration.hosts(),
        hold: configuration.hold(),
        lock: configuration.lock_config()?,
    };

    let shutdown = startup::wait_for_shutdown_signal();
    let service = MemoryCoordinationService::new();

    let report = demo::run(&service, &settings, &shutdown).await?;
    if report.failed > 0 {
        error!(failed = report.failed, "some hosts could not complete");
        anyhow::bail!("{} of {} hosts failed", report.failed, settings.hosts);
    }

    info!("all hosts done, exiting");
    Ok(())
}

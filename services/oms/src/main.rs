use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::bounded;
use tracing_subscriber::EnvFilter;

use idgen::Generator;
use ledger::{FileLog, LedgerConfig, LedgerPoint};
use notifier::{Hub, HubConfig, PushNotifier};
use oms::Oms;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("starting OMS service");

    let config = LedgerConfig::from_env().context("invalid configuration")?;
    let log = Arc::new(
        FileLog::open(config.journal_path())
            .with_context(|| format!("opening event log at {:?}", config.journal_path()))?,
    );

    let point = Arc::new(LedgerPoint::new(log, config.service_id.clone()));
    let generator =
        Arc::new(Generator::new(config.instance_id).context("invalid instance id")?);

    let engine = Oms::new(point.clone(), generator);
    let hub = Arc::new(Hub::new(HubConfig::default()));
    let push = Arc::new(PushNotifier::new(hub.clone(), point.clone()));

    point.subscribe(engine.clone());
    point.subscribe(push);

    let (_shutdown_tx, shutdown_rx) = bounded(1);
    let handle = point.clone().start(shutdown_rx).context("starting ledger point")?;

    // Replay runs until our own start marker comes back.
    while !point.is_ready() {
        std::thread::sleep(Duration::from_millis(100));
    }
    tracing::info!(service_id = %config.service_id, "replay complete");

    engine.init_replay();
    tracing::info!("OMS service ready");

    match handle.join() {
        Ok(result) => result.context("ledger point terminated"),
        Err(_) => anyhow::bail!("ledger point thread panicked"),
    }
}

//! # meshpoll Entry Point
//!
//! Resolves every node known to the border router and prints each node's
//! telemetry. Configuration comes from `MESHPOLL_*` environment variables;
//! logging is controlled with `RUST_LOG`.

use log::{error, info};
use meshpoll::topology::{BusctlProvider, SnapshotProvider, TopologyProvider};
use meshpoll::{MeshpollConfig, PollSession, TopologySource, UdpCoapTransport};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MeshpollConfig::from_env()?;

    let provider: Box<dyn TopologyProvider> = match &config.topology {
        TopologySource::Bus(bus) => {
            info!("Using border router {} at {}", bus.service, bus.object_path);
            Box::new(BusctlProvider::new(bus.clone()))
        }
        TopologySource::Snapshot(path) => {
            info!("Using topology snapshot {}", path.display());
            Box::new(SnapshotProvider::new(path.clone()))
        }
    };
    let transport = UdpCoapTransport::new(config.transmission.clone());

    let session = PollSession::new(provider, transport, config.poller.clone(), config.skip_first);

    let stdout = std::io::stdout();
    let stats = match session.run(&mut stdout.lock()).await {
        Ok(stats) => stats,
        Err(e) => {
            error!("Failed to resolve node addresses: {}", e);
            return Err(e.into());
        }
    };
    drop(session);

    info!(
        "Polled {} nodes: {} readings ({} empty), {} failures",
        stats.nodes_polled, stats.readings, stats.empty_payloads, stats.failures
    );

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use transaq_engine::core::Config;
use transaq_engine::engine::{Engine, Services};
use transaq_engine::logging;
use transaq_engine::transport::ipc::IpcTransport;

fn main() -> anyhow::Result<()> {
    // 1. Configuration, then logging (its level and directory come from the file)
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&path)?;
    let log = logging::init(&config.app)?;

    tracing::info!("transaq-engine starting with {}", path.display());

    // 2. Runtime for the connector bridge only; everything else runs on threads
    let rt = tokio::runtime::Runtime::new()?;

    let transport = match IpcTransport::connect(&config.connection.socket_path, rt.handle()) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to reach the connector: {}", e);
            tracing::error!("Make sure the connector process is running first.");
            std::process::exit(1);
        }
    };

    // 3. Engine: inbound worker, scheduler, first connect
    let engine = Engine::new(
        config,
        transport,
        Services {
            log: Some(log),
            ..Services::default()
        },
    )?;
    engine.start()?;

    let events = engine.subscribe();
    std::thread::Builder::new().name("events".into()).spawn(move || {
        while let Ok(event) = events.recv() {
            tracing::trace!(?event, "engine event");
        }
    })?;

    // 4. Run until told to stop
    rt.block_on(wait_for_signal())?;
    tracing::info!("stop requested");
    stop(&engine);
    Ok(())
}

fn stop(engine: &Arc<Engine>) {
    engine.shutdown();
    tracing::info!("transaq-engine stopped");
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

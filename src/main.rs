//! Daemon entry point: line loop over stdin until EOF.

use anyhow::Result;
use cogni_living::{DaemonConfig, Dispatcher, ModelStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = DaemonConfig::load();

    // Diagnostics go to stderr; stdout carries only protocol lines.
    let filter = EnvFilter::try_from_env("COGNI_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("cogni-living analytics daemon v{}", env!("CARGO_PKG_VERSION"));

    let store = ModelStore::open(config.storage.data_dir.clone());
    let mut dispatcher = Dispatcher::new(&config, store);
    dispatcher.restore();
    info!("engines restored, waiting for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        for output in dispatcher.handle_line(&line) {
            stdout.write_all(output.render().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    info!("EOF on stdin, shutting down");
    Ok(())
}

//! # Tandem
//!
//! Joins a collaborative document and follows its state until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the default config search path
//! tandem
//!
//! # Run with a specific config file
//! tandem /path/to/tandem.toml
//!
//! # Run with environment variables
//! TANDEM_LOCAL=1 TANDEM_DOCUMENT_ID=doc-1 TANDEM_ACCESS_TOKEN=secret tandem
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tandem_client::{metrics, Callbacks, ClientConfig, Session, SessionOptions};
use tandem_core::Store;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=info,tandem_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_file(&path)?,
        None => ClientConfig::load()?,
    };

    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)
            .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;
    }

    let store = if config.storage.enabled {
        let storage = config.storage.file_storage();
        info!(path = %storage.path().display(), "Persisting state");
        Store::with_storage(Arc::new(storage))
    } else {
        Store::new()
    };

    let url = config.connection_url()?;
    info!(
        document = %config.session.document_id,
        server = %config.server.base_url(),
        rest = %config.rest_client().base_url(),
        "Starting Tandem session"
    );

    let callbacks = Callbacks::new()
        .on_document_loaded(|document| {
            info!(document = %document.id, name = %document.name, "Document loaded");
        })
        .on_set_node(|node| info!(node = %node.id, "Node set"))
        .on_delete_node(|node_id| info!(node = %node_id, "Node deleted"));

    let options = SessionOptions::new(
        url,
        config.session.document_id.clone(),
        config.session.user_id.clone(),
    )
    .with_protocols(config.server.protocols.clone())
    .with_reconnect(config.reconnect.clone())
    .with_format(config.server.format)
    .with_callbacks(callbacks);

    let session = Session::connect(options, store).context("Failed to start session")?;
    let mut updates = session.subscribe();
    let mut connected = false;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state.connected != connected {
                    connected = state.connected;
                    info!(connected, "Connection status changed");
                }
            }
        }
    }

    session.close();
    session.dispatcher().store().flush().await;

    let state = session.state();
    info!(
        documents = state.documents.len(),
        nodes = state.nodes.len(),
        retry_count = session.socket().retry_count(),
        "Session ended"
    );

    Ok(())
}

//! Relay server binary.
//!
//! ```text
//! murmur-relay [bind_addr]
//! ```
//!
//! The bind address falls back to `MURMUR_BIND`, then `127.0.0.1:9191`.
//! Log verbosity comes from `RUST_LOG` (env_logger).

use std::sync::Arc;

use murmur_relay::{MemoryAttachmentStore, RelayConfig, RelayServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind_addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MURMUR_BIND").ok())
        .unwrap_or_else(|| "127.0.0.1:9191".to_string());

    let config = RelayConfig {
        bind_addr,
        ..RelayConfig::default()
    };
    let server = RelayServer::new(config, Arc::new(MemoryAttachmentStore::default()));

    if let Err(e) = server.run().await {
        log::error!("relay exited: {e}");
        std::process::exit(1);
    }
}

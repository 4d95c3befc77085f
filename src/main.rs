//! Causal chat hub entrypoint.
//!
//! Wires together the three pieces that make a running server: structured logging, the [`Config`]
//! read from the command line, and the [`Hub`] served over TCP. The binary boundary is the only
//! place this crate uses `anyhow` directly — everywhere else errors are the typed enums in
//! [`causal_chat_hub::error`].

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use causal_chat_hub::config::Config;
use causal_chat_hub::hub::Hub;
use causal_chat_hub::transport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_args();
    let hub = Arc::new(Hub::new());

    transport::serve(hub, config).await
}

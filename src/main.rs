//! Speech-intelligibility scoring server.
//!
//! This is the entry point for the scoring server. It initializes the
//! configuration, starts the worker pool, binds the multiplexed socket, and
//! runs the dispatch loop until interrupted.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::fmt;

use si_score_server::{
    config::Config,
    error::Result,
    scoring::{PoolConfig, ScorerPool},
    server::{dispatch, ServerState},
    transport::MuxSocket,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .json()
        .init();

    // Load configuration
    let config = Config::load()?;

    info!(
        "Starting worker pool: {} workers, model {:?}",
        config.pool_size, config.model_path
    );
    let pool = ScorerPool::start(&PoolConfig {
        pool_size: config.pool_size,
        model_path: config.model_path.clone(),
    })?;

    let state = Arc::new(ServerState::new(pool, config.max_outstanding));

    let socket = MuxSocket::bind(&config.bind_addr()).await?;
    info!(
        "{}: connected! Ceiling {} outstanding requests",
        socket.identity(),
        config.max_outstanding
    );

    tokio::select! {
        outcome = dispatch::run(socket, state) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Server shutting down...");
            Ok(())
        }
    }
}

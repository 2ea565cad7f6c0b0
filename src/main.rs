//! time-server binary.
//!
//! Listens on the configured port and answers every line with the current
//! time until interrupted with Ctrl-C.

use time_server::{Config, TimeServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        history_capacity = config.history_capacity.get(),
        idle_both = ?config.session.idle.both,
        workers = ?config.workers,
        "Starting time server"
    );

    let server = TimeServer::new(config);
    server.create_and_start(server.config().port)?;
    server.run_until_interrupted()?;

    info!(
        retained = server.recent_messages().len(),
        "Time server stopped"
    );
    Ok(())
}

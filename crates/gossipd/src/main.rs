//! gossipd - gossip broadcast node
//!
//! Speaks the JSON line protocol on stdin/stdout. Logs go to stderr.

use clap::Parser;
use gossipd::config::Config;
use gossipd::server::Server;
use rumor_net::StdioTransport;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gossipd={level},rumor_net={level}")));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    init_logging(&config);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("gossipd v{} - gossip broadcast node", env!("CARGO_PKG_VERSION"));

    let (transport, inbox) = StdioTransport::spawn(config.outbox_capacity);
    let server = Arc::new(Server::new(config, transport));

    // Install signal handler
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_server.shutdown();
        }
    });

    server.run(inbox).await;

    ExitCode::SUCCESS
}

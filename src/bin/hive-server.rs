//! Development server for the hive gateway
#![forbid(unsafe_code)]

use clap::Parser;
use hive_server::api::{run_api_server, AppState};
use hive_server::config::load_config;
use hive_server::persistence::Database;
use hive_server::rpc::methods::default_registry;
use hive_server::steemd::Steemd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hive-server", about = "HTTP and JSON-RPC gateway for the hive indexer")]
struct Cli {
    /// Port to listen on (overrides PORT and config.toml)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Include failure details in error responses and log at debug level
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    debug: bool,

    /// Path to a TOML config file (default: ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    config.server.debug = cli.debug;

    let db = match Database::open(&config) {
        Ok(db) => db,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let steemd = match Steemd::new(&config.steemd) {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(steemd = %steemd.url(), "upstream node configured");

    let state = AppState::new(config, Arc::new(db), Arc::new(steemd), default_registry());

    let result = run_api_server(state.clone()).await;
    if let Err(e) = &result {
        error!("HTTP server exception: {}", e);
    }
    state.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

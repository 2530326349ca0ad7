//! DRLMS reference server
//!
//! Serves the regular files of one directory over the line protocol.
//!
//! Run with: cargo run --bin drlms-server -- --root /tmp/drlms

use anyhow::Context;
use clap::Parser;
use drlms_core::LogFormat;
use drlms_server::{Server, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (command-line flags override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory whose files are served
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Extra account as NAME=PASSWORD (repeatable)
    #[arg(short, long = "user", value_parser = parse_account)]
    users: Vec<(String, String)>,

    /// Largest accepted upload in bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_account(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, password)| (name.to_string(), password.to_string()))
        .ok_or_else(|| format!("expected NAME=PASSWORD, got {raw:?}"))
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut config = match args.config {
        Some(ref path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    config.users.extend(args.users);
    if args.max_file_size.is_some() {
        config.max_file_size = args.max_file_size;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if args.log_file.is_some() {
        config.logging.file = args.log_file;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let config = match load_config(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    let _log_guard = match drlms_core::logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            std::process::exit(1);
        }
    };

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting DRLMS server"
    );

    if !config.root_dir.exists() {
        info!(
            event = "creating_root_directory",
            directory = ?config.root_dir,
            "Creating root directory"
        );
        if let Err(e) = std::fs::create_dir_all(&config.root_dir) {
            error!(
                event = "root_directory_creation_failed",
                directory = ?config.root_dir,
                error = %e,
                "Failed to create root directory"
            );
            std::process::exit(1);
        }
    }

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        max_file_size = ?config.max_file_size,
        chunk_size = config.chunk_size,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        "Server configuration"
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(event = "server_creation_failed", error = %e, "Failed to start server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(event = "server_error", error = %e, "Server encountered an error");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(event = "server_shutdown", "Interrupted, shutting down");
        }
    }
}

//! smartplug-mcp: MCP server for AI-assisted smart-plug control
//!
//! This tool lets AI assistants list, inspect and switch the smart plugs of a
//! vendor cloud account.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use smartplug_mcp::backend::auth::{Authenticator, StoredTokenAuthenticator};
use smartplug_mcp::backend::sdm::SdmBackend;
use smartplug_mcp::config::{self, Config};
use smartplug_mcp::error::ServerError;
use smartplug_mcp::mcp::server::McpServer;
use smartplug_mcp::telemetry::{Telemetry, TracingTelemetry};
use smartplug_mcp::tools::{ToolDispatcher, ToolRegistry};

/// MCP server for AI-assisted smart-plug control.
///
/// Exposes list, get-state and on/off tools for the smart plugs of a vendor
/// cloud account.
#[derive(Parser, Debug)]
#[command(name = "smartplug-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the server from configuration.
///
/// Loading the stored credential and constructing the vendor client are the
/// only fallible steps; both are fatal at startup.
fn build_server(cfg: &Config) -> Result<McpServer, ServerError> {
    let credentials_path = config::credentials_path(cfg)?;

    let auth: Arc<dyn Authenticator> = Arc::new(StoredTokenAuthenticator::load(
        &credentials_path,
        cfg.vendor.request_timeout(),
    )?);
    info!(path = %credentials_path.display(), "Stored credential loaded");

    let backend = SdmBackend::new(&cfg.vendor, auth).map_err(|e| ServerError::Backend {
        message: e.to_string(),
    })?;

    info!(
        project = %cfg.vendor.project_id,
        plug_types = ?cfg.vendor.plug_types,
        "Device backend configured"
    );

    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry::new());
    let dispatcher = ToolDispatcher::new(
        Arc::new(ToolRegistry::new()),
        Arc::new(backend),
        Arc::clone(&telemetry),
    );

    Ok(McpServer::new(Arc::new(dispatcher), telemetry))
}

/// Entry point for the smartplug-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("It needs at least: {{\"vendor\": {{\"project_id\": \"...\"}}}}");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!(
        "smartplug-mcp {}  Copyright (C) 2026  The Embedded Society",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!("Source: {}", env!("CARGO_PKG_REPOSITORY"));
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting smartplug-mcp server"
    );

    // Wire up credential, backend and tools; without a credential no tool can work
    let mut server = match build_server(&cfg) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    info!("MCP server ready, waiting for client connection...");

    // Run the server
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(server.run());

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "INFO"), Level::INFO);
        assert_eq!(get_log_level(0, false, "loud"), Level::WARN);
    }
}

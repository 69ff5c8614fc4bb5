//! Spindle Server - OpenAI-compatible chat completion API
//!
//! This binary serves the Spindle generation pipeline over HTTP.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spindle_server::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    server::{run_server, SpindleServer},
};

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "spindle-server",
    about = "OpenAI-compatible chat completion server",
    long_about = "Serves /v1/chat/completions in JSON and server-sent-event form, with bounded concurrency, stop sequences and reasoning-section extraction."
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server bind address, overrides the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines instead of pretty output
    #[arg(long)]
    json_logs: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start,
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "spindle-server.toml")]
        output: PathBuf,
        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> ServerResult<()> {
    let mut args = Args::parse();

    init_logging(&args)?;

    match args.command.take() {
        Some(Commands::Start) | None => start_server(args).await,
        Some(Commands::Config { output, force }) => generate_config(output, force),
        Some(Commands::Validate { config }) => validate_config(config),
        Some(Commands::Info) => {
            show_info();
            Ok(())
        }
    }
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) -> ServerResult<()> {
    let log_level = args
        .log_level
        .parse::<Level>()
        .map_err(|_| ServerError::Config(format!("Invalid log level: {}", args.log_level)))?;

    let mut env_filter = EnvFilter::from_default_env();
    for target in ["spindle_server", "spindle_core"] {
        let directive = format!("{}={}", target, log_level)
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid log directive: {}", e)))?;
        env_filter = env_filter.add_directive(directive);
    }

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(env_filter)
            .init();
    }

    Ok(())
}

/// Start the server
async fn start_server(args: Args) -> ServerResult<()> {
    info!("Starting Spindle Server v{}", spindle_server::VERSION);

    if let Some(path) = &args.config {
        info!("Loading configuration from: {:?}", path);
    }
    let mut config = ServerConfig::load(args.config.as_deref())
        .map_err(|e| ServerError::Config(format!("Failed to load config: {}", e)))?;

    if let Some(bind) = &args.bind {
        config.bind = bind
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid bind address: {}", e)))?;
    }

    let server = SpindleServer::new(config)?;

    info!("Server configuration:");
    info!("  Bind address: {}", server.config().bind);
    info!("  Model: {}", server.config().model.id);
    info!("  Max concurrent: {}", server.config().limits.max_concurrent);
    info!("  Reasoning parser: {:?}", server.config().reasoning.parser);

    run_server(server).await
}

/// Generate a default configuration file
fn generate_config(output: PathBuf, force: bool) -> ServerResult<()> {
    if output.exists() && !force {
        error!("Configuration file already exists: {:?}", output);
        error!("Use --force to overwrite");
        return Err(ServerError::Config(
            "Configuration file already exists".to_string(),
        ));
    }

    ServerConfig::default()
        .to_file(&output)
        .map_err(|e| ServerError::Config(format!("Failed to write config: {}", e)))?;

    info!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Validate a configuration file
fn validate_config(config_path: PathBuf) -> ServerResult<()> {
    info!("Validating configuration file: {:?}", config_path);

    let config = ServerConfig::from_file(&config_path).map_err(|e| {
        error!("Configuration validation failed: {}", e);
        ServerError::Config(format!("Invalid configuration: {}", e))
    })?;
    config.validate()?;

    info!("Configuration is valid");
    info!("  Bind address: {}", config.bind);
    info!("  Model: {}", config.model.id);
    info!("  Max concurrent: {}", config.limits.max_concurrent);
    Ok(())
}

/// Show server information
fn show_info() {
    println!("Spindle Server v{}", spindle_server::VERSION);
    println!("An OpenAI-compatible chat completion server");
    println!();
    println!("Endpoints:");
    println!("  GET  /                      Service banner");
    println!("  GET  /health                Liveness");
    println!("  GET  /health/ready          Admission capacity");
    println!("  GET  /v1/models             Served model");
    println!("  POST /v1/chat/completions   Chat completion, JSON or SSE");
    println!();
    println!("Configuration:");
    println!("  Default bind address: 0.0.0.0:7088");
    println!("  Environment overrides: SPINDLE_<SECTION>__<KEY>");
    println!();
    println!("Usage:");
    println!("  spindle-server                       # Start with default config");
    println!("  spindle-server -c config.toml        # Start with custom config");
    println!("  spindle-server config                # Generate default config");
    println!("  spindle-server validate config.toml  # Validate config file");
}

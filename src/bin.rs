//! Binary entry point for `botforge`.
//!
//! This module provides the command-line interface for botforge with options
//! for configuration file paths and logging verbosity, and subcommands for
//! running the bot or its MCP tool server.

use botforge::base::{config::Config, types::Void};
use clap::{Parser, Subcommand};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Botforge – an LLM-backed Discord bot.
///
/// Configuration can come from `config.toml` or `BOTFORGE_*` environment variables.
/// The bot answers when mentioned, replied to, or triggered by a configured word,
/// and can look things up with tools before answering.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the bot will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Discord bot and its management server (the default).
    Run,
    /// Serve the store and filesystem tools over MCP on stdio.
    McpServer {
        /// Directory the filesystem tools may access; repeat for more than one.
        #[arg(long = "root")]
        roots: Vec<std::path::PathBuf>,
    },
}

/// Main entry point for the botforge binary.
///
/// Sets up logging based on verbosity, loads configuration, and runs the selected command.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer; stdout belongs to the MCP transport when serving tools.

    let mcp_mode = matches!(args.command, Some(Command::McpServer { .. }));

    let logs = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(!mcp_mode)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("botforge");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(logs).init();

    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => botforge::start(config).await,
        Command::McpServer { roots } => botforge::serve_mcp(config, roots).await,
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camfeed::config::ConfigStore;
use camfeed::state::AppState;
use camfeed::stream::{SessionTuning, StreamSession};
use camfeed::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camfeed command line arguments
#[derive(Parser, Debug)]
#[command(name = "camfeed")]
#[command(version, about = "MJPEG camera streaming server", long_about = None)]
struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", default_value = "/etc/camfeed/camfeed.toml")]
    config: PathBuf,

    /// Listen address (overrides file config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides file config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting camfeed v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::new(&args.config).await?;
    let server = {
        let mut server = config_store.get().server.clone();
        if let Some(addr) = args.address {
            server.host = addr;
        }
        if let Some(port) = args.port {
            server.port = port;
        }
        server
    };

    let session = StreamSession::spawn(config_store.clone(), SessionTuning::default());
    let state = AppState::new(config_store, session);

    // Bring the pipeline up before accepting viewers; a dead camera still
    // serves, it just degrades through the fallback ladder
    if let Err(e) = state.session.start().await {
        tracing::error!(error = %e, "Initial stream start failed");
    }

    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {e}", server.host, server.port))?;
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Kill the capture process and drop cached frames before exiting
    if let Err(e) = state.session.stop().await {
        tracing::warn!(error = %e, "Stream stop during shutdown failed");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camfeed=error,tower_http=error",
        LogLevel::Warn => "camfeed=warn,tower_http=warn",
        LogLevel::Info => "camfeed=info,tower_http=info",
        LogLevel::Verbose => "camfeed=debug,tower_http=info",
        LogLevel::Debug => "camfeed=debug,tower_http=debug",
        LogLevel::Trace => "camfeed=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

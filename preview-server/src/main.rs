//! Preview server entry point.
//!
//! ```text
//! preview-server                  Run with preview-server.toml (or defaults)
//! preview-server --port 5000      Override the listen port
//! preview-server --config <path>  Load a custom config TOML
//! preview-server --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use preview_server::config::RenderServerConfig;
use preview_server::service::RenderService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "preview-server", about = "Test render server for the remote preview UI")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "preview-server.toml")]
    config: PathBuf,

    /// Listen port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides the config file).
    #[arg(long)]
    log_level: Option<String>,

    /// Do not send the HDR test image on connect.
    #[arg(long)]
    no_hdr: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RenderServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RenderServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.no_hdr {
        config.hdr.send_on_connect = false;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("preview-server v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}:{}", config.network.bind_address, config.network.port);
    info!(
        "stream: {}x{} @ {} fps",
        config.stream.width, config.stream.height, config.stream.fps
    );

    let mut service = RenderService::new(config);
    let running = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        running.store(false, Ordering::SeqCst);
    });

    let outcome = tokio::task::spawn_blocking(move || service.run()).await??;
    info!(?outcome, "server stopped");
    Ok(())
}

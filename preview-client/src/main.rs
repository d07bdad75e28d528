//! Preview client entry point.
//!
//! ```text
//! preview-client                    Connect with defaults
//! preview-client --server host:port Override the server address
//! preview-client --config <path>    Use custom config TOML
//! preview-client --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use preview_core::DecodeLoop;
use preview_core::preview::BulkState;

use preview_client::config::ClientConfig;
use preview_client::connection::RemoteSession;
use preview_client::display::HeadlessDisplay;

/// Time given to the writer to flush the final stop/detach.
const FLUSH_GRACE: Duration = Duration::from_millis(100);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "preview-client", about = "Headless remote UI for the render preview")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "preview-client.toml")]
    config: PathBuf,

    /// Server address (overrides config). Example: 192.168.1.20:4242
    #[arg(short, long)]
    server: Option<String>,

    /// Detach after this many seconds (overrides config).
    #[arg(long)]
    run_for: Option<u64>,

    /// Ask the server to stop on exit instead of detaching.
    #[arg(long)]
    stop_server: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(addr) = cli.server {
        config.network.server_address = addr;
    }
    if let Some(secs) = cli.run_for {
        config.controls.run_for_secs = secs;
    }
    if cli.stop_server {
        config.controls.stop_server_on_exit = true;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("preview-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect and handshake ────────────────────────────────

    let mut session = RemoteSession::connect(&config).await?;
    session.apply_controls(&config.controls)?;

    // ── 2. Start decoding ───────────────────────────────────────

    let mut video = session
        .take_video()
        .ok_or("video receiver already taken")?;
    let idle_timeout = config.idle_timeout();
    // Probing the stream blocks until the first frames arrive.
    let video = tokio::task::spawn_blocking(move || {
        video.initialise_video_stream(idle_timeout).map(|()| video)
    })
    .await??;
    let mut decode = DecodeLoop::start(video, config.video.channels)?;
    let mut display = HeadlessDisplay::new(
        decode.bridge(),
        Duration::from_secs(config.display.stats_interval_secs.max(1)),
    );

    // ── 3. Present loop ─────────────────────────────────────────

    let deadline = (config.controls.run_for_secs > 0)
        .then(|| Instant::now() + Duration::from_secs(config.controls.run_for_secs));
    let mut last_hdr = 0;
    let mut tick = tokio::time::interval(config.frame_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        display.present();
        display.maybe_log_stats(&session.telemetry().latest());

        let generation = session.hdr_display().generation();
        if generation != last_hdr {
            last_hdr = generation;
            if let Some(image) = session.hdr_display().latest() {
                info!(width = image.width, height = image.height, "HDR image received");
            }
        }

        if !session.ok() {
            warn!("connection to the render server lost");
            break;
        }
        if !decode.stream_ok() {
            warn!("video stream stalled");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("run time elapsed");
            break;
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    let stats = display.stats_line(&session.telemetry().latest());
    info!("{}", stats);
    if let BulkState::Receiving { expected, received } = session.hdr().state() {
        info!(expected, received, "dropping incomplete HDR transfer");
    }
    if let Some(path) = config.snapshot_path() {
        if let Err(e) = display.write_snapshot(&path) {
            warn!(path = %path.display(), error = %e, "could not write snapshot");
        }
    }
    session
        .finish(config.controls.stop_server_on_exit, FLUSH_GRACE)
        .await;
    decode.stop();

    Ok(())
}

//! Streamkit server entry point.
//!
//! ```text
//! streamkit-server                  Run in the foreground
//! streamkit-server --config <path>  Load a custom config TOML
//! streamkit-server --gen-config     Write default config to stdout
//! streamkit-server --write-config   Write default config to --config path
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamkit_server::config::ServerConfig;
use streamkit_server::service::StreamingService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "streamkit-server", about = "Streamkit rendering stream server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "streamkit-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    write_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    if cli.write_config {
        ServerConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    // Load config.
    let config = ServerConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("streamkit-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "signaling relay: {}:{} as {}",
        config.signaling.server, config.signaling.port, config.signaling.client_name
    );
    info!(
        "capture: {}x{} @ {} fps ({:?})",
        config.capture.width, config.capture.height, config.capture.fps, config.capture.encoder
    );

    let service = StreamingService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    let report = service.run().await?;
    info!(
        rendered = report.frames_rendered,
        delivered = report.frames_delivered,
        sessions = report.sessions_created,
        "done"
    );

    Ok(())
}

//! # Saurus Relay - Main Entry Point
//!
//! Connects game servers with their players' companion apps. This entry point
//! handles CLI parsing, configuration loading, and application lifecycle
//! management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates saurus.toml if missing)
//! saurus
//!
//! # Specify custom configuration
//! saurus --config production.toml
//!
//! # Override specific settings
//! saurus --bind 0.0.0.0:8443 --log-level debug
//!
//! # Serve wss:// and emit JSON logs
//! saurus --cert fullchain.pem --key privkey.pem --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT or SIGTERM closes every connection with `"Shutting down"` and
//! exits. A second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;

/// Runs the relay process.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging comes first so configuration problems are reported through it.
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{
    AppConfig, HeartbeatSettings, LoggingSettings, PairingSettings, RequestSettings, ServerSettings,
};

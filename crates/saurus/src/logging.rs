//! Logging system setup and configuration.
//!
//! Installs a `tracing-subscriber` registry with either human-readable or
//! JSON output. `RUST_LOG` takes precedence over the configured level;
//! otherwise the WebSocket and TLS stacks are held at `warn` so frame-level
//! tracing of the relay stays readable.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dependencies capped at `warn` when no `RUST_LOG` is set.
const QUIET_TARGETS: [&str; 3] = ["tungstenite", "tokio_tungstenite", "rustls"];

/// Filter directives for a configured level.
fn filter_directives(level: &str) -> String {
    QUIET_TARGETS
        .iter()
        .fold(level.to_string(), |acc, target| format!("{acc},{target}=warn"))
}

/// Initializes the logging system with the specified configuration.
///
/// # Arguments
///
/// * `config` - Logging configuration after CLI overrides
/// * `json_format` - Whether to force JSON output format (CLI override)
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(&config.level))?,
    };

    let json = json_format || config.json_format;
    // Exactly one formatter is installed.
    let json_layer = json.then(|| fmt::layer().json().flatten_event(true).with_thread_names(true));
    let pretty_layer = (!json).then(|| fmt::layer().with_thread_names(true).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    info!(
        "🔧 Logging initialized with level {} ({})",
        config.level,
        if json { "json" } else { "pretty" }
    );
    Ok(())
}

/// Displays the startup banner using proper logging.
pub fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║             🦖 SAURUS RELAY 🦖           ║");
    info!("║  {:^40}║", format!("v{version}"));
    info!("║                                          ║");
    info!("║  Game servers ⇄ companion apps           ║");
    info!("║  🔢 Pairing codes  🔑 Session tokens      ║");
    info!("║  💓 Heartbeats     🔐 Optional TLS        ║");
    info!("╚══════════════════════════════════════════╝");
}

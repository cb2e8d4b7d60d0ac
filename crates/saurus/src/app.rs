//! Main application logic and lifecycle management.
//!
//! The `Application` binds the relay, reports on it while it runs, and takes
//! it down gracefully when a termination signal arrives.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, wait_for_signal},
};
use saurus_events::ShutdownState;
use saurus_server::Relay;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the status line is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);
/// How long the relay gets to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

pub struct Application {
    config: AppConfig,
    relay: Relay,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Bind the relay
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let relay = Relay::bind(config.to_listen_options()?, config.to_handler_config()).await?;
        Ok(Self { config, relay })
    }

    /// Runs the relay until a termination signal, then shuts it down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Saurus relay");
        self.log_configuration_summary();

        let shutdown = ShutdownState::new();
        let mut relay_handle = {
            let relay = self.relay.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { relay.run(shutdown).await })
        };

        let monitoring_handle = {
            let relay = self.relay.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATUS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    log_status(&relay);
                }
            })
        };

        info!("✅ Saurus is now running!");
        info!("🎮 Ready to accept connections on {}", self.relay.local_addr()?);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = setup_signal_handlers(&shutdown) => signal?,
            finished = &mut relay_handle => {
                monitoring_handle.abort();
                return match finished {
                    Ok(result) => Ok(result?),
                    Err(e) => Err(e.into()),
                };
            }
        }

        // A second signal skips the graceful path.
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again! Exiting now.");
            std::process::exit(1);
        });

        monitoring_handle.abort();
        info!("🛑 Shutdown signal received, closing connections...");

        match tokio::time::timeout(SHUTDOWN_GRACE, relay_handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => warn!("⏰ Relay did not stop within {:?}", SHUTDOWN_GRACE),
        }

        log_status(&self.relay);
        info!("✅ Saurus shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  🔐 TLS: {}",
            if self.config.server.tls_enabled() { "enabled" } else { "disabled" }
        );
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  🔢 Pairing code lifetime: {}ms", self.config.pairing.code_timeout_ms);
        info!(
            "  💓 Heartbeat: every {}ms, {}ms to answer",
            self.config.heartbeat.interval_ms, self.config.heartbeat.timeout_ms
        );
    }
}

/// Folds the command-line overrides into the loaded configuration.
fn apply_overrides(config: &mut AppConfig, args: CliArgs) {
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(cert) = args.cert_file {
        config.server.cert_file = cert.to_string_lossy().into_owned();
    }
    if let Some(key) = args.key_file {
        config.server.key_file = key.to_string_lossy().into_owned();
    }
}

fn log_status(relay: &Relay) {
    let handler = relay.handler();
    info!(
        "📊 Relay status - {} connections | {} servers | {} pending codes | {} tokens",
        relay.listener().connection_count(),
        handler.server_count(),
        handler.pending_codes(),
        handler.token_count()
    );
}

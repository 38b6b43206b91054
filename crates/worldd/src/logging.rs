//! Logging system setup and configuration.
//!
//! Installs the tracing subscriber with either human-readable or JSON output.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system with the specified configuration.
///
/// `RUST_LOG` wins over the configured level when set. `json_format` forces
/// JSON output regardless of the file setting.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    } else {
        // Worker thread names (map-worker-N) show which pool thread ticked a map
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner through the logger.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║             🗺️  WORLD DAEMON 🗺️            ║");
    info!("║                  v{}                  ║", version);
    info!("║                                          ║");
    info!("║  Continents, Dungeons and Battlegrounds  ║");
    info!("║                                          ║");
    info!("║  🧱 Terrain Grid Lifecycle               ║");
    info!("║  🔒 Instance Bindings and Resets         ║");
    info!("║  ⚡ Parallel Map Updates                 ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}

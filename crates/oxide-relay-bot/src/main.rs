mod redact;

use dotenvy::dotenv;
use oxide_relay_core::RelaySettings;
use oxide_relay_transport_instagram::{run_server, InstagramSettings, ServerSettings};
use redact::{RedactingMakeWriter, RedactionPatterns};
use std::io;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Compiled before logging starts so nothing is written unmasked
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Oxide Relay (Instagram)...");

    let settings = init_settings();
    run_server(settings).await
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "oxide_relay_core=info,oxide_relay_runtime=info,oxide_relay_transport_instagram=info,oxide_relay_bot=info,hyper=warn,h2=error,reqwest=warn,tokio=warn,tower=warn,tower_http=warn,async_openai=warn",
            )
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> ServerSettings {
    let relay_settings = match RelaySettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load relay configuration: {}", e);
            std::process::exit(1);
        }
    };
    let instagram_settings = match InstagramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load instagram configuration: {}", e);
            std::process::exit(1);
        }
    };

    let missing = instagram_settings.missing_required();
    if !missing.is_empty() {
        warn!(missing = ?missing, "Instagram credentials incomplete; delivery or verification will fail");
    }

    info!("Configuration loaded successfully.");
    ServerSettings::new(relay_settings, instagram_settings)
}

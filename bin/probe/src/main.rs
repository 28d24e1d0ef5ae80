//! Loads the framework settings, registers the configured integrations and
//! prints the status of each one as JSON.
//!
//! Usage: `switchyard-probe [settings.toml]`

use std::path::PathBuf;
use switchyard_integration::{FrameworkSettings, IntegrationFramework};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = FrameworkSettings::load(settings_path.as_deref())
        .expect("failed to load configuration");
    tracing::info!(
        integrations = settings.integrations.len(),
        "Loaded configuration"
    );

    let framework = IntegrationFramework::from_settings(&settings)
        .await
        .expect("failed to start integration framework");

    let statuses = framework.list_integrations().await;
    for status in &statuses {
        if !status.connectivity {
            tracing::warn!(integration = %status.name, "integration unreachable");
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&statuses).expect("statuses serialize to JSON")
    );

    framework.shutdown().await;
}

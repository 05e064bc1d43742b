use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use veranda_session::{AppState, Config, FileBackend};

/// Where the persisted auth state lives when the shell does not say otherwise
fn default_store_path() -> PathBuf {
    std::env::var_os("VERANDA_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs_fallback_home()
                .join(".veranda")
                .join("session.json")
        })
}

fn dirs_fallback_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(_) => None,
    };

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veranda_session=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    if let Some(path) = env_file_path {
        info!("Loaded environment variables from {}", path.display());
    }

    let config = Config::from_env();
    let store_path = default_store_path();
    info!(api_url = %config.api_url, store = %store_path.display(), "Checking session");

    let state = AppState::new(&config, Arc::new(FileBackend::new(store_path))).await;
    state.initialize().await;

    let snapshot = state.session.snapshot().await;
    match &snapshot.user {
        Some(user) => {
            info!(
                user = %user.email,
                super_admin = user.is_super_admin,
                tenant = %snapshot
                    .tenant
                    .as_ref()
                    .map(|t| t.slug.as_str())
                    .unwrap_or("-"),
                "Session is active"
            );
            println!(
                "signed in as {} ({})",
                user.email,
                snapshot
                    .tenant
                    .as_ref()
                    .and_then(|t| t.name.as_deref().or(Some(t.slug.as_str())))
                    .unwrap_or("no tenant")
            );
        }
        None => {
            if snapshot.has_token {
                warn!("Stored token present but identity could not be confirmed");
                println!("not signed in (cached token could not be validated right now)");
            } else {
                println!("not signed in");
            }
        }
    }

    Ok(())
}

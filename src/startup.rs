//! Startup helpers for the campus DM server.
//!
//! The bundled binary runs against a local SQLite file with a token-map
//! identity provider seeded from the environment; the campus platform
//! embeds the same `AppState` with its real identity backend instead.

use std::process::ExitCode;
use std::sync::Arc;

use crate::dm::core::config::DmConfig;
use crate::dm::core::ids::PartyId;
use crate::dm::identity::{Party, StaticIdentityProvider};
use crate::dm::rate_limit::InMemoryRateLimiter;
use crate::server::{self, AppState};

/// Environment variable holding the SQLite database path.
pub const ENV_DB_PATH: &str = "CAMPUS_DM_DB";
/// Environment variable holding the listen port.
pub const ENV_PORT: &str = "CAMPUS_DM_PORT";
/// Environment variable holding seeded access tokens.
///
/// Format: comma-separated `token=party-uuid` pairs; every seeded account
/// counts as email-confirmed.
pub const ENV_TOKENS: &str = "CAMPUS_DM_TOKENS";

/// Run the server (used by the `campus-dm-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting campus-dm v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DmConfig::default();
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        config.storage.sqlite_path = path.into();
    }
    tracing::info!("Database: {}", config.storage.sqlite_path.display());

    let identity = Arc::new(StaticIdentityProvider::new());
    match std::env::var(ENV_TOKENS) {
        Ok(raw) => match parse_token_seeds(&raw) {
            Ok(seeds) => {
                let count = seeds.len();
                for (token, id) in seeds {
                    identity.register(
                        token,
                        Party {
                            id,
                            email_confirmed: true,
                        },
                    );
                }
                tracing::info!("Seeded {count} access tokens");
            }
            Err(e) => {
                tracing::error!("Invalid {ENV_TOKENS}: {e}");
                return ExitCode::from(1);
            }
        },
        Err(_) => {
            tracing::warn!("No {ENV_TOKENS} configured; every request will be unauthenticated");
        }
    }

    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(async {
        let state = AppState::new(&config, identity, Arc::new(InMemoryRateLimiter::new())).await?;
        server::run_server(state, port)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))
    });

    if let Err(e) = result {
        tracing::error!("Fatal: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Parse the `token=party-uuid` pairs of [`ENV_TOKENS`].
///
/// # Errors
/// Returns a description of the first malformed entry.
pub fn parse_token_seeds(raw: &str) -> Result<Vec<(String, PartyId)>, String> {
    let mut seeds = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (token, id) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected token=party-uuid, got {entry:?}"))?;
        if token.is_empty() {
            return Err(format!("empty token in {entry:?}"));
        }
        let id: PartyId = id
            .parse()
            .map_err(|_| format!("malformed party uuid in {entry:?}"))?;
        seeds.push((token.to_string(), id));
    }
    Ok(seeds)
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(ENV_PORT)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}

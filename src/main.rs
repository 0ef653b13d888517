use std::time::Duration;

mod app;
mod auth;
mod clock;
mod config;
mod drivers;
mod error;
mod notify;
mod rides;
mod state;
mod store;
#[cfg(test)]
mod testing;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "ridehail=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let sweep_every = Duration::from_secs(config.auth.session_sweep_seconds.max(1));
    let state = AppState::init(config).await?;
    state.auth.sessions().spawn_sweeper(sweep_every);

    app::serve(app::build_app(state)).await
}

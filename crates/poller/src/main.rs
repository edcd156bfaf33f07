//! `vmpanel-poller` -- headless VM dashboard poller daemon.
//!
//! Restores (or establishes) an authenticated session against the
//! VMPanel backing API, then polls every VM's live status on a fixed
//! interval, logging status transitions.  Exits when the session is
//! lost (a failed token refresh) or on ctrl-c.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default               | Description                       |
//! |----------------------------|----------|-----------------------|-----------------------------------|
//! | `VMPANEL_API_URL`          | yes      | --                    | Backing API base URL              |
//! | `VMPANEL_POLL_INTERVAL_MS` | no       | `1000`                | Milliseconds between poll batches |
//! | `VMPANEL_TOKEN_FILE`       | no       | `vmpanel-tokens.json` | Token persistence file            |
//! | `VMPANEL_EMAIL`            | no       | --                    | Login email (first run)           |
//! | `VMPANEL_PASSWORD`         | no       | --                    | Login password (first run)        |

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vmpanel_client::{ApiClient, AuthState, FileTokenStorage, SessionManager};
use vmpanel_poller::{PollerConfig, StatusPoller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmpanel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PollerConfig::from_env();

    tracing::info!(
        api_url = %config.api_url,
        interval_ms = config.poll_interval.as_millis() as u64,
        token_file = %config.token_file.display(),
        "Starting vmpanel-poller",
    );

    let storage = Arc::new(FileTokenStorage::new(&config.token_file));
    let session = Arc::new(SessionManager::new(storage));
    let api = ApiClient::new(config.api_url.clone(), session.clone());

    api.bootstrap().await;

    if !session.is_authenticated() {
        match (&config.email, &config.password) {
            (Some(email), Some(password)) => {
                api.login(email, password).await?;
                tracing::info!(email = %email, "Logged in with provided credentials");
            }
            _ => {
                tracing::error!(
                    "No stored session and no VMPANEL_EMAIL / VMPANEL_PASSWORD provided"
                );
                std::process::exit(1);
            }
        }
    }

    let vm_count = session.vms().len();
    tracing::info!(vm_count, "Session ready");

    let cancel = CancellationToken::new();

    // A forced logout (failed refresh) shuts the daemon down; there is
    // no one at the keyboard to log back in.
    let mut states = session.subscribe();
    let logout_cancel = cancel.clone();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            if *states.borrow() == AuthState::Unauthenticated {
                tracing::error!("Session lost; shutting down");
                logout_cancel.cancel();
                break;
            }
        }
    });

    let poller = Arc::new(StatusPoller::new(api));
    let run_poller = poller.clone();
    let run_cancel = cancel.clone();
    let interval = config.poll_interval;
    let poll_task = tokio::spawn(async move { run_poller.run(interval, run_cancel).await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    poll_task.await?;
    Ok(())
}

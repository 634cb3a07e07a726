mod api;
mod config;
mod error;
mod external_services;
mod history;
mod reference;
mod tasks;
mod transaction_handler;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{router, AppState};
use crate::config::MainConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = MainConfig::from_env().context("loading SEPAY_* configuration")?;
    let state = AppState::from_config(&config).await?;
    let app = router(state);

    let addr = config.listen_addr();
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .context("loading TLS certificate")?;

            info!(%addr, "listening with TLS");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!(%addr, "listening");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("server stopped");

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

mod error;

use std::sync::Arc;

use error::ServerError;
use hostel_allotment_backend::telemetry::setup_telemetry;
use hostel_allotment_backend::{cors_layer, router, AppState};
use hostel_allotment_config::get_config;
use hostel_allotment_database::{ScopedStore, ServiceStore};
use hostel_allotment_identity::HttpIdentityVerifier;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    setup_telemetry();

    let config = get_config()?;

    let state = AppState {
        scoped: Arc::new(ScopedStore::connect(&config.database.scoped_url)?),
        service: Arc::new(ServiceStore::connect(&config.database.service_url)?),
        identity: Arc::new(HttpIdentityVerifier::new(&config.identity)?),
    };
    let app = router(state).layer(cors_layer(&config.client_url)?);

    let listener = TcpListener::bind(config.listen_address).await?;
    info!("listening on {}", config.listen_address);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[allow(clippy::redundant_pub_crate)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutting down");
}

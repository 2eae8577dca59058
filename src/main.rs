use tikfetch::{
    config::AppConfig,
    error::ApiError,
    routes::{AppState, router},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tikfetch=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = AppConfig::from_env();
    let state = AppState::new(&config)?;

    let providers = state.resolver().provider_names();
    if providers.is_empty() {
        warn!("No provider configured. Set LIBRARY_ENDPOINT or TIKWM_ENDPOINT.");
    } else {
        info!("Providers in order: {}", providers.join(" -> "));
    }
    if config.library_endpoint.is_none() {
        warn!("LIBRARY_ENDPOINT not set. Only the public mirror will be used.");
    }

    let app = router(state);
    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

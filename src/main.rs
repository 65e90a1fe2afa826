use mailpilot::{
    config::{validate_production_config, AppConfig},
    db, routes, AppState,
};

use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailpilot=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    if config.is_production() {
        validate_production_config(&config)?;
    }

    // Database connection
    let pool = db::create_pool().await?;

    // Run migrations
    db::run_migrations(&pool).await?;

    let state = AppState::new(pool, config)?;

    // Background housekeeping
    state.rate_limiter.clone().spawn_purge_task();
    if state.sync_service.clone().spawn_auto_sync().is_none() {
        tracing::info!("Auto-sync disabled; mail is fetched on request only");
    }

    let app = routes::build_router(state);

    // Start server
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()?;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));

    tracing::info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

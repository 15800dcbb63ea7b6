use std::net::SocketAddr;

use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env();
    let pool = database::connection::connect_pool(&config.database_url).await?;
    let app_state = AppState::new(pool, config.clone());

    let app = build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("🚀 Bingwa Sokoni API running on {}", addr);
    tracing::info!("📡 M-Pesa environment: {}", config.mpesa_environment);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/orders", routes::orders::routes())
        .nest("/api/payments", routes::payments::routes())
        .nest("/api/packages", routes::packages::routes())
        .nest("/api/users", routes::users::routes())
        .nest("/api/delivery", routes::delivery::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "ok",
        "database": db_status,
        "mpesa_environment": state.config.mpesa_environment,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

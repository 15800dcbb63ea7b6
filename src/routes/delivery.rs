use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::delivery;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/trigger/:order_id", post(delivery::trigger_delivery))
        .route("/retry/:order_id", post(delivery::retry_delivery))
        .route("/status/:order_id", get(delivery::delivery_status))
}

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::payments;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(payments::initiate_payment))
        .route("/callback", post(payments::mpesa_callback))
        .route("/:id/status", get(payments::payment_status))
        .route("/:id/query", post(payments::query_payment))
}

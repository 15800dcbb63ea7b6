use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::orders;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::list_orders).post(orders::create_order))
        .route("/sync", post(orders::sync_orders))
        .route("/:id", get(orders::get_order).patch(orders::update_order))
        .route("/:id/cancel", post(orders::cancel_order))
}

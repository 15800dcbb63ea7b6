use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::users;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(users::register_user))
        .route("/phone/:phone", get(users::get_user_by_phone))
        .route("/:id", get(users::get_user).patch(users::update_user))
        .route("/:id/orders", get(users::user_orders))
        .route("/:id/stats", get(users::user_stats))
}

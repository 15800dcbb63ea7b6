use axum::{
    routing::get,
    Router,
};

use crate::handlers::packages;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(packages::list_packages).post(packages::create_package))
        .route("/categories", get(packages::list_categories))
        .route("/featured", get(packages::featured_packages))
        .route("/category/:category", get(packages::packages_by_category))
        .route(
            "/:id",
            get(packages::get_package)
                .patch(packages::update_package)
                .delete(packages::delete_package),
        )
}

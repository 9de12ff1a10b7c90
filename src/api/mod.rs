/// API routes and handlers
pub mod domains;
pub mod health;
pub mod lookups;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(lookups::routes())
        .merge(domains::routes())
}

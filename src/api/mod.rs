pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, patch, post},
    Router,
};

/// 全部 HTTP 路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/trips", post(create_trip))
        .route("/api/trips/:id/tags", post(add_tag))
        .route("/api/trips/:id/receipt", post(attach_receipt))
        .route("/api/trips/:id/submit", post(submit_trip))
        .route("/api/trips/:id/bulk-cost", post(bulk_cost))
        .route("/api/tags/:id", patch(edit_tag))
        .route("/api/enrich", post(enrich))
        .route("/api/parse-receipt", post(parse_receipt))
        .route("/api/match", post(match_trip))
        .route("/api/finalize", post(finalize))
        .route("/api/profitability", get(profitability))
        .with_state(state)
}

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", post(collect_logs))
}

/// Buffer a raw payload: one line, or a JSON array of lines.
///
/// Always accepted; partitioning and processing happen after the next flush.
pub async fn collect_logs(
    Extension(services): Extension<Arc<AppServices>>,
    body: String,
) -> axum::response::Response {
    let accepted = services.buffer().collect(&body);
    tracing::debug!(accepted, "logs collected");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted })),
    )
        .into_response()
}

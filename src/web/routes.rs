//! HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::AppState;
use crate::model::DailyStats;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Earliest date to include
    #[serde(default)]
    pub from: Option<NaiveDate>,
}

pub enum ApiError {
    NotFound,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "No stats found for customer" })),
            )
                .into_response(),
            ApiError::Internal(e) => {
                tracing::error!("Stats query failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}

/// API: daily stats for one customer, optionally from a given date on.
///
/// 404 only for customers with no records at all; a `from` past the last
/// record yields an empty list.
pub async fn customer_stats(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<DailyStats>>, ApiError> {
    state
        .db
        .customer_stats(&customer_id, query.from)
        .await
        .map_err(ApiError::Internal)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

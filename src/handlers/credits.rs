// src/handlers/credits.rs
//! Credit balance, grants and plan estimation.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{TransactionType, WorkflowPlan};
use crate::services::pricing;
use crate::AppState;

/// GET /api/credits/:user_id/balance - display balance (clamped at zero)
pub async fn get_balance(
    Path(user_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let balance = state.ledger.balance_display(&user_id).await;
    (
        StatusCode::OK,
        Json(json!({ "user_id": user_id, "balance": balance })),
    )
}

#[derive(Deserialize)]
pub struct GrantRequest {
    pub credits: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/credits/:user_id/grant - fund an account
pub async fn grant_credits(
    Path(user_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<GrantRequest>,
) -> impl IntoResponse {
    if request.credits <= 0.0 {
        return (StatusCode::BAD_REQUEST, "Grant must be positive").into_response();
    }

    let units = pricing::credits_to_units(request.credits);
    let trans_no = format!("grant-{}", Uuid::new_v4());
    match state
        .ledger
        .post(
            &user_id,
            TransactionType::Grant,
            units,
            &trans_no,
            request.reason,
        )
        .await
    {
        Ok(tx) => {
            let balance = state.ledger.balance_display(&user_id).await;
            (
                StatusCode::OK,
                Json(json!({
                    "transaction_id": tx.id,
                    "trans_no": tx.trans_no,
                    "balance": balance,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to grant credits to {}: {}", user_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /api/credits/:user_id/transactions - ledger history
pub async fn get_transactions(
    Path(user_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let transactions = state.ledger.transactions_for(&user_id).await;
    (
        StatusCode::OK,
        Json(json!({ "user_id": user_id, "transactions": transactions })),
    )
}

/// POST /api/plans/estimate - price a plan with the same functions the
/// pipeline deducts with (this is where `estimated_credits` comes from)
pub async fn estimate_plan(Json(plan): Json<WorkflowPlan>) -> impl IntoResponse {
    match pricing::estimate_plan(&plan) {
        Ok(units) => (
            StatusCode::OK,
            Json(json!({
                "estimated_credits": pricing::units_to_credits(units),
                "estimated_units": units,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Routes for credits and pricing
pub fn credit_routes() -> Router {
    Router::new()
        .route("/api/credits/:user_id/balance", get(get_balance))
        .route("/api/credits/:user_id/grant", post(grant_credits))
        .route("/api/credits/:user_id/transactions", get(get_transactions))
        .route("/api/plans/estimate", post(estimate_plan))
}

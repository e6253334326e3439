//! HTTP API for Momenty access.

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use momenty_access::{AccessError, AccessService, CheckResponse, PurchaseOutcome, SweepReport};
use momenty_types::{PurchaseCompleted, SubscriberRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Deserialize, Debug, Default)]
pub struct CheckQuery {
    pub token: Option<String>,
    pub device: Option<String>,
}

/// Body of a purchase event response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseResponse {
    Ignored,
    Granted {
        token: String,
        /// Unix seconds.
        expires: i64,
        renewals: u32,
    },
    Dropped,
}

impl From<PurchaseOutcome> for PurchaseResponse {
    fn from(outcome: PurchaseOutcome) -> Self {
        match outcome {
            PurchaseOutcome::Ignored => Self::Ignored,
            PurchaseOutcome::Dropped { .. } => Self::Dropped,
            PurchaseOutcome::Granted {
                token,
                expires_at,
                renewal_count,
                ..
            } => Self::Granted {
                token: token.into_inner(),
                expires: expires_at.timestamp(),
                renewals: renewal_count,
            },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct SubscriberQuery {
    pub search: Option<String>,
}

/// A subscriber record with its remaining whole days.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberView {
    #[serde(flatten)]
    pub record: SubscriberRecord,
    pub days_left: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReserveRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReserveResponse {
    pub token: String,
}

/// An error rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        let status = match &err {
            AccessError::InvalidEmail(_) | AccessError::IdentityCreation(_) => {
                StatusCode::BAD_REQUEST
            }
            AccessError::Storage(_) | AccessError::TokenSpaceExhausted(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn check_access_handler(
    State(service): State<Arc<AccessService>>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> Json<CheckResponse> {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            debug!("unreadable access query: {rejection}");
            return Json(CheckResponse::denied());
        }
    };
    match service
        .check_access(query.token.as_deref(), query.device.as_deref(), Utc::now())
        .await
    {
        Ok(decision) => Json(decision.into()),
        Err(e) => {
            error!("access check failed: {e}");
            Json(CheckResponse::denied())
        }
    }
}

async fn purchase_handler(
    State(service): State<Arc<AccessService>>,
    Json(event): Json<PurchaseCompleted>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    match service.handle_purchase(&event, Utc::now()).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(e) => {
            warn!(order = %event.order_id, "purchase event failed: {e}");
            Err(ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: e.to_string(),
            })
        }
    }
}

async fn sweep_handler(
    State(service): State<Arc<AccessService>>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = service.run_sweep(Utc::now()).await.map_err(|e| {
        error!("reminder sweep failed: {e}");
        ApiError::from(e)
    })?;
    Ok(Json(report))
}

async fn subscribers_handler(
    State(service): State<Arc<AccessService>>,
    Query(query): Query<SubscriberQuery>,
) -> Result<Json<Vec<SubscriberView>>, ApiError> {
    let now = Utc::now();
    let records = service.subscribers(query.search.as_deref()).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|record| SubscriberView {
                days_left: record.days_left(now),
                record,
            })
            .collect(),
    ))
}

async fn reserve_handler(
    State(service): State<Arc<AccessService>>,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let token = service.reserve_token(&request.email, Utc::now()).await?;
    Ok(Json(ReserveResponse {
        token: token.into_inner(),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the HTTP API router over a shared service.
pub fn build_router(service: Arc<AccessService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/access/check", get(check_access_handler))
        .route("/events/purchase-completed", post(purchase_handler))
        .route("/tokens/reserve", post(reserve_handler))
        .route("/sweep", post(sweep_handler))
        .route("/admin/subscribers", get(subscribers_handler))
        .with_state(service)
}

//! Distribution HTTP handlers
//! Mission: Thin adapters from role-bearing requests to `DistributionService`

use crate::api::error::ApiError;
use crate::auth::models::{Claims, Principal};
use crate::distribution::{
    ApprovalRole, DistributionService, NewDistribution, PaymentConfirmation, PaymentFailure,
    PaymentInitiation, PaymentReceipt, PaymentRecord,
};
use crate::models::{Distribution, DistributionFilter, PageRequest};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<DistributionService>,
}

// ===== Request/Response Types =====

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form16Request {
    pub document_ref: String,
}

#[derive(Debug, Serialize)]
pub struct DistributionList {
    pub count: usize,
    pub distributions: Vec<Distribution>,
}

impl From<Vec<Distribution>> for DistributionList {
    fn from(distributions: Vec<Distribution>) -> Self {
        Self {
            count: distributions.len(),
            distributions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentHistory {
    pub count: usize,
    pub payments: Vec<PaymentRecord>,
}

fn principal(claims: &Claims) -> Principal {
    Principal::from(claims)
}

// ===== Queries =====

pub async fn list_distributions(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Query(filter): Query<DistributionFilter>,
) -> Result<Json<DistributionList>, ApiError> {
    let list = state.service.list(&principal(&claims), filter).await?;
    Ok(Json(list.into()))
}

pub async fn my_distributions(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageRequest>,
) -> Result<Json<DistributionList>, ApiError> {
    let list = state.service.my_distributions(&principal(&claims), page).await?;
    Ok(Json(list.into()))
}

pub async fn pending_review(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageRequest>,
) -> Result<Json<DistributionList>, ApiError> {
    let list = state.service.pending_review(&principal(&claims), page).await?;
    Ok(Json(list.into()))
}

pub async fn get_distribution(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .get_distribution(&principal(&claims), &id)
        .await?;
    Ok(Json(dist))
}

pub async fn payment_history(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path((id, investor_id)): Path<(String, String)>,
) -> Result<Json<PaymentHistory>, ApiError> {
    let payments = state
        .service
        .payment_history(&principal(&claims), &id, &investor_id)
        .await?;
    Ok(Json(PaymentHistory {
        count: payments.len(),
        payments,
    }))
}

// ===== Lifecycle =====

pub async fn create_distribution(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<NewDistribution>,
) -> Result<(StatusCode, Json<Distribution>), ApiError> {
    let dist = state.service.create(&principal(&claims), request).await?;
    Ok((StatusCode::CREATED, Json(dist)))
}

pub async fn calculate(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state.service.calculate(&principal(&claims), &id).await?;
    Ok(Json(dist))
}

pub async fn submit_for_review(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .submit_for_review(&principal(&claims), &id)
        .await?;
    Ok(Json(dist))
}

async fn approve(
    state: ApiState,
    claims: Claims,
    id: String,
    role: ApprovalRole,
    request: ApprovalRequest,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .approve(&principal(&claims), &id, role, request.comments)
        .await?;
    Ok(Json(dist))
}

pub async fn approve_asset_manager(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<Distribution>, ApiError> {
    approve(state, claims, id, ApprovalRole::AssetManager, request).await
}

pub async fn approve_compliance(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<Distribution>, ApiError> {
    approve(state, claims, id, ApprovalRole::Compliance, request).await
}

pub async fn approve_admin(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<Distribution>, ApiError> {
    approve(state, claims, id, ApprovalRole::Admin, request).await
}

pub async fn cancel(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .cancel(&principal(&claims), &id, request.reason)
        .await?;
    Ok(Json(dist))
}

// ===== Payments =====

pub async fn initiate_payment(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path((id, investor_id)): Path<(String, String)>,
    Json(request): Json<PaymentInitiation>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .initiate_payment(&principal(&claims), &id, &investor_id, request)
        .await?;
    Ok(Json(dist))
}

pub async fn mark_paid(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path((id, investor_id)): Path<(String, String)>,
    Json(request): Json<PaymentConfirmation>,
) -> Result<Json<PaymentReceipt>, ApiError> {
    let receipt = state
        .service
        .mark_investor_paid(&principal(&claims), &id, &investor_id, request)
        .await?;
    Ok(Json(receipt))
}

pub async fn mark_failed(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path((id, investor_id)): Path<(String, String)>,
    Json(request): Json<PaymentFailure>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .mark_investor_failed(&principal(&claims), &id, &investor_id, request)
        .await?;
    Ok(Json(dist))
}

pub async fn attach_form16(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Path((id, investor_id)): Path<(String, String)>,
    Json(request): Json<Form16Request>,
) -> Result<Json<Distribution>, ApiError> {
    let dist = state
        .service
        .attach_form16(&principal(&claims), &id, &investor_id, request.document_ref)
        .await?;
    Ok(Json(dist))
}

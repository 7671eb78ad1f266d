//! Direct transfer handlers
//!
//! One endpoint per flow step, plus a one-shot execute endpoint and a
//! submission lookup by idempotency key.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Serialize;
use tracing::info;
use validator::Validate;

use super::super::state::AppState;
use super::super::types::request::parse_amount;
use super::super::types::{
    AmountRequest, ApiError, ApiResult, AuthorizeRequest, BeginTransferRequest,
    DestinationRequest, ExecuteTransferRequest, FlowView, SubmissionView, SubmitView, ok,
};
use super::{caller_id, idempotency_key, parse_handle};
use crate::error::EngineError;
use crate::idempotency::IdempotencyKey;
use crate::ledger::OwnerId;
use crate::recipient::VerifiedRecipient;
use crate::transfer::{FlowHandle, FlowSnapshot};

#[derive(Debug, Serialize)]
pub struct CancelledFlow {
    pub handle: String,
}

/// Resolve the handle and require that `caller` opened the flow
async fn owned_flow(
    state: &AppState,
    headers: &HeaderMap,
    raw_handle: &str,
) -> Result<(FlowHandle, FlowSnapshot), ApiError> {
    let caller: OwnerId = caller_id(headers)?;
    let handle = parse_handle(raw_handle)?;
    let snapshot = state.funds.flow_snapshot(handle).await?;
    if snapshot.caller != caller {
        return Err(EngineError::Forbidden.into());
    }
    Ok((handle, snapshot))
}

async fn flow_view(state: &AppState, handle: FlowHandle) -> ApiResult<FlowView> {
    let snapshot = state.funds.flow_snapshot(handle).await?;
    ok(FlowView::new(snapshot, state.decimals))
}

/// POST /api/v1/recipients/resolve
pub async fn resolve_recipient(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DestinationRequest>,
) -> ApiResult<VerifiedRecipient> {
    caller_id(&headers)?;
    req.validate()?;

    let routing = req.routing();
    let recipient = state
        .funds
        .resolve_recipient(&req.account_number, routing.as_ref())
        .await?;
    ok(recipient)
}

/// POST /api/v1/transfers
///
/// Opens a flow, verifies the recipient and checks the amount against the
/// balance. The returned flow is waiting for a PIN.
pub async fn begin_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BeginTransferRequest>,
) -> ApiResult<FlowView> {
    let caller = caller_id(&headers)?;
    req.validate()?;

    let amount = parse_amount(&req.amount, state.decimals)?;
    let handle = state
        .funds
        .begin_transfer(
            caller,
            req.source_account_id,
            req.destination.into_destination(),
            amount,
        )
        .await?;
    info!(flow = %handle, caller, "Transfer flow started via gateway");
    flow_view(&state, handle).await
}

/// POST /api/v1/transfers/execute
pub async fn execute_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ExecuteTransferRequest>,
) -> ApiResult<SubmitView> {
    let caller = caller_id(&headers)?;
    let key = idempotency_key(&headers)?;
    req.validate()?;

    let intent = req.into_intent(state.decimals, key)?;
    let receipt = state.funds.transfer(caller, intent).await?;
    ok(SubmitView::new(receipt, state.decimals))
}

/// GET /api/v1/transfers/{handle}
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult<FlowView> {
    let (_, snapshot) = owned_flow(&state, &headers, &handle).await?;
    ok(FlowView::new(snapshot, state.decimals))
}

/// DELETE /api/v1/transfers/{handle}
pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult<CancelledFlow> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    state.funds.cancel_transfer(handle)?;
    ok(CancelledFlow {
        handle: handle.to_string(),
    })
}

/// PUT /api/v1/transfers/{handle}/destination
pub async fn edit_destination(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(req): Json<DestinationRequest>,
) -> ApiResult<FlowView> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    req.validate()?;

    state
        .funds
        .edit_destination(handle, req.into_destination())
        .await?;
    flow_view(&state, handle).await
}

/// PUT /api/v1/transfers/{handle}/amount
pub async fn set_transfer_amount(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<FlowView> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    req.validate()?;

    let amount = parse_amount(&req.amount, state.decimals)?;
    state.funds.set_transfer_amount(handle, amount).await?;
    flow_view(&state, handle).await
}

/// POST /api/v1/transfers/{handle}/authorize
pub async fn authorize_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(req): Json<AuthorizeRequest>,
) -> ApiResult<FlowView> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    req.validate()?;

    state.funds.authorize_transfer(handle, &req.pin).await?;
    flow_view(&state, handle).await
}

/// POST /api/v1/transfers/{handle}/submit
///
/// An `Idempotency-Key` header is optional; once a flow has dispatched, any
/// key supplied must match the one it used.
pub async fn submit_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult<SubmitView> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    let key = idempotency_key(&headers)?;

    let receipt = state.funds.submit_transfer(handle, key).await?;
    ok(SubmitView::new(receipt, state.decimals))
}

/// POST /api/v1/transfers/{handle}/retry
pub async fn retry_authorization(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> ApiResult<FlowView> {
    let (handle, _) = owned_flow(&state, &headers, &handle).await?;
    let key = idempotency_key(&headers)?;

    state.funds.retry_authorization(handle, key).await?;
    flow_view(&state, handle).await
}

/// GET /api/v1/submissions/{key}
///
/// Keys are scoped to the caller; another caller's key reads as unknown.
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<SubmissionView> {
    let caller = caller_id(&headers)?;
    let key: IdempotencyKey = key.parse()?;
    let record = state
        .funds
        .submission_status(caller, &key)
        .ok_or_else(|| ApiError::not_found(format!("No submission for key {}", key)))?;
    ok(SubmissionView::new(record, state.decimals))
}

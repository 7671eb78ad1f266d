//! Cardless ATM withdrawal code handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use futures::stream;
use validator::Validate;

use super::super::state::AppState;
use super::super::types::request::parse_amount;
use super::super::types::{
    ApiError, ApiResult, AtmCodeView, GenerateAtmCodeRequest, RedeemAtmCodeRequest, ok,
};
use super::{caller_id, idempotency_key};
use crate::error::EngineError;
use crate::ledger::AccountId;

/// POST /api/v1/atm/codes
///
/// Replaces any ACTIVE code on the account. Retrying with the same
/// `Idempotency-Key` returns the code from the first call.
pub async fn generate_atm_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateAtmCodeRequest>,
) -> ApiResult<AtmCodeView> {
    let caller = caller_id(&headers)?;
    let key = idempotency_key(&headers)?;
    req.validate()?;

    let amount = parse_amount(&req.amount, state.decimals)?;
    let receipt = state
        .funds
        .generate_atm_code(caller, req.account_id, amount, key)
        .await?;
    ok(AtmCodeView::from_receipt(
        receipt,
        state.funds.now(),
        state.decimals,
    ))
}

/// GET /api/v1/atm/codes/{account_id}
pub async fn get_atm_code(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<AtmCodeView> {
    let code = state
        .funds
        .get_atm_code_status(account_id)
        .ok_or(ApiError::from(EngineError::NoActiveCode))?;
    ok(AtmCodeView::new(code, state.funds.now(), state.decimals))
}

/// GET /api/v1/atm/codes/{account_id}/countdown
///
/// Server-sent events carrying the remaining seconds of the ACTIVE code.
pub async fn atm_code_countdown(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.funds.atm_countdown(account_id)?;
    let events = stream::unfold(rx, |mut rx| async move {
        let remaining = rx.recv().await?;
        let event = Event::default()
            .event("remaining")
            .data(remaining.to_string());
        Some((Ok::<_, Infallible>(event), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/atm/codes/{account_id}/redeem
///
/// Terminal-side redemption; a code can be redeemed once.
pub async fn redeem_atm_code(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<RedeemAtmCodeRequest>,
) -> ApiResult<AtmCodeView> {
    req.validate()?;
    let code = state.funds.redeem_atm_code(account_id, &req.code)?;
    ok(AtmCodeView::new(code, state.funds.now(), state.decimals))
}

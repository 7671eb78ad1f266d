//! HTTP handlers
//!
//! Caller identity comes from the `X-User-ID` header set by the upstream
//! authentication layer; this gateway does not issue or check credentials.

pub mod atm;
pub mod health;
pub mod transfer;

pub use atm::{atm_code_countdown, generate_atm_code, get_atm_code, redeem_atm_code};
pub use health::health_check;
pub use transfer::{
    authorize_transfer, begin_transfer, cancel_transfer, edit_destination, execute_transfer,
    get_submission, get_transfer, resolve_recipient, retry_authorization, set_transfer_amount,
    submit_transfer,
};

use axum::http::HeaderMap;

use super::types::ApiError;
use crate::idempotency::IdempotencyKey;
use crate::ledger::OwnerId;
use crate::transfer::FlowHandle;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Extract the caller's owner id from HTTP headers
pub(crate) fn caller_id(headers: &HeaderMap) -> Result<OwnerId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing X-User-ID header"))?;

    raw.trim()
        .parse::<OwnerId>()
        .map_err(|_| ApiError::bad_request("Invalid X-User-ID format"))
}

/// Optional client idempotency key
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, ApiError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::bad_request("Invalid Idempotency-Key header"))?;
            Ok(Some(raw.parse::<IdempotencyKey>()?))
        }
    }
}

pub(crate) fn parse_handle(raw: &str) -> Result<FlowHandle, ApiError> {
    Ok(raw.parse::<FlowHandle>()?)
}

//! API Response types
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: Typed error response
//! - View DTOs for flows, submissions and ATM codes

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::atm::{AtmCodeReceipt, AtmWithdrawalCode};
use crate::error::EngineError;
use crate::idempotency::{IdempotencyRecord, RecordState};
use crate::ledger::AccountId;
use crate::money;
use crate::recipient::VerifiedRecipient;
use crate::transfer::{DestinationKind, FlowSnapshot, SubmitReceipt, TransferOutcome};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, otherwise the HTTP status of the failure
/// - msg: short message description
/// - data: payload on success, error detail on failure
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Errors
// ============================================================================

/// Machine-readable part of an error response
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorData {
    pub error: &'static str,
    pub class: &'static str,
    /// Key to re-query when the outcome is unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub msg: String,
    pub data: Option<ErrorData>,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let idempotency_key = match &e {
            EngineError::StatusUnknown { idempotency_key } => Some(idempotency_key.clone()),
            _ => None,
        };
        Self {
            status: StatusCode::from_u16(e.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            msg: e.to_string(),
            data: Some(ErrorData {
                error: e.code(),
                class: e.class().as_str(),
                idempotency_key,
            }),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            code: self.status.as_u16() as i32,
            msg: self.msg,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Transfer flow as shown to callers
#[derive(Debug, Serialize)]
pub struct FlowView {
    pub handle: String,
    pub state: &'static str,
    pub source_account_id: AccountId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<DestinationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<VerifiedRecipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub remaining_pin_attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FlowView {
    pub fn new(snapshot: FlowSnapshot, decimals: u32) -> Self {
        Self {
            handle: snapshot.handle.to_string(),
            state: snapshot.state.as_str(),
            source_account_id: snapshot.source_account_id,
            destination: snapshot.destination,
            recipient: snapshot.recipient,
            amount: snapshot.amount.map(|a| money::format_amount(a, decimals)),
            remaining_pin_attempts: snapshot.remaining_pin_attempts,
            idempotency_key: snapshot.idempotency_key.map(String::from),
            reference_id: snapshot.reference_id,
            outcome_status: snapshot.outcome_status.map(|s| s.as_str()),
            failure_code: snapshot.failure_code,
            failure_message: snapshot.failure_message,
            updated_at: snapshot.updated_at,
        }
    }
}

/// Outcome of a transfer submission
#[derive(Debug, Serialize)]
pub struct SubmitView {
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub status: &'static str,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<&'static str>,
}

impl SubmitView {
    pub fn new(receipt: SubmitReceipt, decimals: u32) -> Self {
        Self::from_outcome(receipt.idempotency_key.to_string(), &receipt.outcome, decimals)
    }

    fn from_outcome(key: String, outcome: &TransferOutcome, decimals: u32) -> Self {
        Self {
            idempotency_key: key,
            reference_id: outcome.reference_id.clone(),
            status: outcome.status.as_str(),
            amount: money::format_amount(outcome.amount, decimals),
            failure_code: outcome.failure_reason.as_ref().map(|e| e.code()),
        }
    }
}

/// Stored submission looked up by idempotency key
#[derive(Debug, Serialize)]
pub struct SubmissionView {
    pub idempotency_key: String,
    pub status: &'static str,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SubmitView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SubmissionView {
    pub fn new(record: IdempotencyRecord<TransferOutcome>, decimals: u32) -> Self {
        let key = record.key.to_string();
        let (outcome, error) = match &record.state {
            RecordState::Completed(outcome) => (
                Some(SubmitView::from_outcome(key.clone(), outcome, decimals)),
                None,
            ),
            RecordState::Failed(e) => (None, Some(e.code())),
            RecordState::InFlight => (None, None),
        };
        Self {
            status: record.status().as_str(),
            idempotency_key: key,
            attempts: record.attempts,
            outcome,
            error,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        }
    }
}

/// Withdrawal code with its remaining validity
#[derive(Debug, Serialize)]
pub struct AtmCodeView {
    pub code: String,
    pub account_id: AccountId,
    pub amount: String,
    pub status: &'static str,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl AtmCodeView {
    pub fn new(code: AtmWithdrawalCode, now: DateTime<Utc>, decimals: u32) -> Self {
        Self {
            remaining_seconds: code.remaining_seconds(now),
            amount: money::format_amount(code.amount, decimals),
            status: code.status.as_str(),
            code: code.code,
            account_id: code.account_id,
            issued_at: code.issued_at,
            expires_at: code.expires_at,
            idempotency_key: None,
        }
    }

    pub fn from_receipt(receipt: AtmCodeReceipt, now: DateTime<Utc>, decimals: u32) -> Self {
        Self {
            idempotency_key: Some(receipt.idempotency_key.to_string()),
            ..Self::new(receipt.code, now, decimals)
        }
    }
}

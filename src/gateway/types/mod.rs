//! Gateway types module
//!
//! ## Input Types
//! - [`request`]: JSON request bodies, checked with `validator`
//!
//! ## Output Types
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`]: Error response built from an [`EngineError`](crate::error::EngineError)
//! - View DTOs with amounts formatted as decimal strings

pub mod request;
pub mod response;

pub use request::{
    AmountRequest, AuthorizeRequest, BeginTransferRequest, DestinationRequest,
    ExecuteTransferRequest, GenerateAtmCodeRequest, RedeemAtmCodeRequest,
};
pub use response::{
    ApiError, ApiResponse, ApiResult, AtmCodeView, ErrorData, FlowView, SubmissionView,
    SubmitView, ok,
};

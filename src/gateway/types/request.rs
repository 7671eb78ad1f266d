//! Request bodies
//!
//! Amounts arrive as decimal strings and are parsed with the currency's
//! minor-unit precision; anything finer is rejected rather than rounded.

use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use super::response::ApiError;
use crate::error::EngineError;
use crate::idempotency::IdempotencyKey;
use crate::ledger::AccountId;
use crate::money;
use crate::recipient::RoutingInfo;
use crate::transfer::{Destination, TransferIntent};

/// Parse a client amount string into a `Decimal` with at most `decimals` places
pub fn parse_amount(raw: &str, decimals: u32) -> Result<Decimal, ApiError> {
    let units = money::parse_amount(raw, decimals).map_err(EngineError::from)?;
    Ok(money::to_decimal(units, decimals))
}

fn routing(institution_code: &Option<String>) -> Option<RoutingInfo> {
    institution_code.as_deref().map(RoutingInfo::new)
}

/// Destination account plus optional partner-bank routing
#[derive(Debug, Deserialize, Validate)]
pub struct DestinationRequest {
    #[validate(length(min = 1, max = 34, message = "account_number is required"))]
    pub account_number: String,
    #[validate(length(min = 1, max = 16))]
    pub institution_code: Option<String>,
}

impl DestinationRequest {
    pub fn routing(&self) -> Option<RoutingInfo> {
        routing(&self.institution_code)
    }

    pub fn into_destination(self) -> Destination {
        Destination {
            routing: self.routing(),
            account_number: self.account_number,
        }
    }
}

/// POST /api/v1/transfers
#[derive(Debug, Deserialize, Validate)]
pub struct BeginTransferRequest {
    #[validate(range(min = 1))]
    pub source_account_id: AccountId,
    #[validate(nested)]
    pub destination: DestinationRequest,
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AmountRequest {
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
}

/// Carries a PIN, so no `Debug`
#[derive(Deserialize, Validate)]
pub struct AuthorizeRequest {
    #[validate(length(equal = 4, message = "PIN must be exactly 4 digits"))]
    pub pin: String,
}

/// POST /api/v1/transfers/execute: the whole intent in one call
#[derive(Deserialize, Validate)]
pub struct ExecuteTransferRequest {
    #[validate(range(min = 1))]
    pub source_account_id: AccountId,
    #[validate(nested)]
    pub destination: DestinationRequest,
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
    #[validate(length(equal = 4, message = "PIN must be exactly 4 digits"))]
    pub pin: String,
}

impl ExecuteTransferRequest {
    pub fn into_intent(
        self,
        decimals: u32,
        key: Option<IdempotencyKey>,
    ) -> Result<TransferIntent, ApiError> {
        Ok(TransferIntent {
            source_account_id: self.source_account_id,
            amount: parse_amount(&self.amount, decimals)?,
            destination_routing: self.destination.routing(),
            destination_account_number: self.destination.account_number,
            pin_code: self.pin,
            client_idempotency_key: key,
        })
    }
}

/// POST /api/v1/atm/codes
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateAtmCodeRequest {
    #[validate(range(min = 1))]
    pub account_id: AccountId,
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RedeemAtmCodeRequest {
    #[validate(length(min = 4, max = 12))]
    pub code: String,
}

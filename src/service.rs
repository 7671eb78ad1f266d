//! Funds Service
//!
//! Caller-facing entry point over the transfer orchestrator and the ATM code
//! issuer. Amounts cross this boundary as [`Decimal`] and are converted to
//! minor units here; everything below works in [`MinorUnits`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::debug;

use crate::atm::{AtmCodeIssuer, AtmCodeReceipt, AtmWithdrawalCode};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::ledger::{AccountId, AccountLedger, OwnerId};
use crate::money::{self, MinorUnits};
use crate::network::BankNetwork;
use crate::recipient::{RecipientResolver, RoutingInfo, VerifiedRecipient};
use crate::transfer::{
    Destination, FlowHandle, FlowSnapshot, SubmitReceipt, TransferIntent, TransferOrchestrator,
    TransferOutcome,
};

pub struct FundsService {
    resolver: Arc<RecipientResolver>,
    transfers: TransferOrchestrator,
    atm: Arc<AtmCodeIssuer>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FundsService {
    pub fn new(
        ledger: Arc<dyn AccountLedger>,
        network: Arc<dyn BankNetwork>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let resolver = Arc::new(RecipientResolver::new(
            ledger.clone(),
            network,
            clock.clone(),
            config.clone(),
        ));
        let transfers = TransferOrchestrator::new(
            ledger.clone(),
            resolver.clone(),
            clock.clone(),
            config.clone(),
        );
        let atm = Arc::new(AtmCodeIssuer::new(ledger, clock.clone(), &config));
        Self {
            resolver,
            transfers,
            atm,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine time; expiry and retention are judged against it
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn minor_units(&self, amount: Decimal) -> Result<MinorUnits, EngineError> {
        Ok(money::parse_decimal(amount, self.config.currency_decimals)?)
    }

    // ========================================================================
    // Direct transfer
    // ========================================================================

    pub async fn resolve_recipient(
        &self,
        account_number: &str,
        routing: Option<&RoutingInfo>,
    ) -> Result<VerifiedRecipient, EngineError> {
        self.resolver.resolve(account_number, routing).await
    }

    /// Open a flow and run it through verification and amount validation
    ///
    /// The returned handle is waiting for a PIN.
    pub async fn begin_transfer(
        &self,
        caller: OwnerId,
        source_account_id: AccountId,
        destination: Destination,
        amount: Decimal,
    ) -> Result<FlowHandle, EngineError> {
        let amount = self.minor_units(amount)?;
        self.transfers
            .begin(caller, source_account_id, destination, amount)
            .await
    }

    pub async fn authorize_transfer(
        &self,
        handle: FlowHandle,
        pin: &str,
    ) -> Result<FlowHandle, EngineError> {
        self.transfers.authorize(handle, pin).await
    }

    pub async fn submit_transfer(
        &self,
        handle: FlowHandle,
        key: Option<IdempotencyKey>,
    ) -> Result<SubmitReceipt, EngineError> {
        self.transfers.submit(handle, key).await
    }

    /// One-shot transfer: begin, authorize and submit in a single call
    pub async fn transfer(
        &self,
        caller: OwnerId,
        intent: TransferIntent,
    ) -> Result<SubmitReceipt, EngineError> {
        self.transfers.run_intent(caller, intent).await
    }

    /// Replace the destination of an undispatched flow and verify it again
    ///
    /// The amount is discarded with the old recipient and must be set again.
    pub async fn edit_destination(
        &self,
        handle: FlowHandle,
        destination: Destination,
    ) -> Result<VerifiedRecipient, EngineError> {
        let kind = self.transfers.destination_kind(destination.routing);
        self.transfers.select_destination_type(handle, kind).await?;
        self.transfers
            .enter_account_number(handle, &destination.account_number)
            .await?;
        self.transfers.verify_recipient(handle).await
    }

    pub async fn set_transfer_amount(
        &self,
        handle: FlowHandle,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let amount = self.minor_units(amount)?;
        self.transfers.set_amount(handle, amount).await
    }

    pub async fn retry_authorization(
        &self,
        handle: FlowHandle,
        key: Option<IdempotencyKey>,
    ) -> Result<FlowHandle, EngineError> {
        self.transfers.retry_authorization(handle, key).await
    }

    pub fn cancel_transfer(&self, handle: FlowHandle) -> Result<(), EngineError> {
        self.transfers.cancel(handle)
    }

    pub async fn flow_snapshot(&self, handle: FlowHandle) -> Result<FlowSnapshot, EngineError> {
        self.transfers.snapshot(handle).await
    }

    /// Outcome of a submission, visible only to the owner who supplied the key
    pub fn submission_status(
        &self,
        owner: OwnerId,
        key: &IdempotencyKey,
    ) -> Option<IdempotencyRecord<TransferOutcome>> {
        self.transfers.submission_status(owner, key)
    }

    // ========================================================================
    // ATM withdrawal codes
    // ========================================================================

    pub async fn generate_atm_code(
        &self,
        caller: OwnerId,
        account_id: AccountId,
        amount: Decimal,
        key: Option<IdempotencyKey>,
    ) -> Result<AtmCodeReceipt, EngineError> {
        let amount = self.minor_units(amount)?;
        self.atm.generate(caller, account_id, amount, key).await
    }

    pub fn get_atm_code_status(&self, account_id: AccountId) -> Option<AtmWithdrawalCode> {
        self.atm.status(account_id)
    }

    /// Remaining seconds of the active code, one value per second
    pub fn atm_countdown(&self, account_id: AccountId) -> Result<mpsc::Receiver<u64>, EngineError> {
        self.atm.countdown(account_id)
    }

    pub fn redeem_atm_code(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> Result<AtmWithdrawalCode, EngineError> {
        self.atm.redeem(account_id, code)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop idempotency records past retention from both guards
    pub fn purge_idempotency(&self) -> usize {
        let purged = self.transfers.purge_idempotency() + self.atm.purge_idempotency();
        debug!(purged, "Idempotency records purged");
        purged
    }

    pub fn sweep_expired_codes(&self) -> usize {
        self.atm.sweep_expired()
    }

    pub fn sweep_abandoned_flows(&self) -> usize {
        self.transfers.sweep_abandoned()
    }

    pub fn active_flows(&self) -> usize {
        self.transfers.active_flows()
    }

    /// Ledger transfer dispatches (replays excluded)
    pub fn transfer_dispatches(&self) -> u64 {
        self.transfers.dispatches()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{MemoryAccount, MemoryLedger};
    use crate::network::ScriptedNetwork;
    use crate::transfer::FlowState;

    fn service() -> (Arc<MemoryLedger>, FundsService) {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = Arc::new(MemoryLedger::with_accounts(
            clock.clone(),
            vec![
                MemoryAccount {
                    account_id: 1,
                    owner_id: 10,
                    account_number: "1000000001".to_string(),
                    holder_name: "Ada Obi".to_string(),
                    balance: 50_000,
                    pin: "1234".to_string(),
                    daily_withdrawal_limit: 100_000,
                    daily_withdrawal_used: 0,
                },
                MemoryAccount {
                    account_id: 2,
                    owner_id: 20,
                    account_number: "1000000002".to_string(),
                    holder_name: "Tunde Bello".to_string(),
                    balance: 0,
                    pin: "9999".to_string(),
                    daily_withdrawal_limit: 100_000,
                    daily_withdrawal_used: 0,
                },
            ],
        ));
        let network = Arc::new(ScriptedNetwork::found("Lin Park", "Partner Bank"));
        let service = FundsService::new(ledger.clone(), network, clock, EngineConfig::default());
        (ledger, service)
    }

    fn bob() -> Destination {
        Destination {
            account_number: "1000000002".to_string(),
            routing: None,
        }
    }

    #[tokio::test]
    async fn test_decimal_amounts_are_converted() {
        let (ledger, service) = service();
        let handle = service
            .begin_transfer(10, 1, bob(), Decimal::new(1050, 2))
            .await
            .unwrap();

        service.authorize_transfer(handle, "1234").await.unwrap();
        let receipt = service.submit_transfer(handle, None).await.unwrap();

        assert_eq!(receipt.outcome.amount, 1_050);
        assert_eq!(ledger.balance(2), Some(1_050));
    }

    #[tokio::test]
    async fn test_sub_cent_amount_rejected() {
        let (_, service) = service();
        let result = service
            .begin_transfer(10, 1, bob(), Decimal::new(1005, 3))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidAmount(_))));
        assert_eq!(service.active_flows(), 0);
    }

    #[tokio::test]
    async fn test_edit_destination_reverifies() {
        let (_, service) = service();
        let handle = service
            .begin_transfer(10, 1, bob(), Decimal::new(100, 0))
            .await
            .unwrap();

        let recipient = service
            .edit_destination(
                handle,
                Destination {
                    account_number: "3000000001".to_string(),
                    routing: Some(RoutingInfo::new("058")),
                },
            )
            .await
            .unwrap();
        assert!(!recipient.is_internal);

        let snapshot = service.flow_snapshot(handle).await.unwrap();
        assert_eq!(snapshot.state, FlowState::RecipientVerified);
        assert!(snapshot.amount.is_none());

        service
            .set_transfer_amount(handle, Decimal::new(100, 0))
            .await
            .unwrap();
        assert_eq!(
            service.flow_snapshot(handle).await.unwrap().state,
            FlowState::Authorize
        );
    }

    #[tokio::test]
    async fn test_atm_code_through_service() {
        let (_, service) = service();
        let receipt = service
            .generate_atm_code(10, 1, Decimal::new(200, 0), None)
            .await
            .unwrap();

        let status = service.get_atm_code_status(1).unwrap();
        assert_eq!(status.code, receipt.code.code);
        assert_eq!(status.amount, 20_000);

        service.redeem_atm_code(1, &receipt.code.code).unwrap();
        assert!(service.get_atm_code_status(1).unwrap().status.is_terminal());
    }
}

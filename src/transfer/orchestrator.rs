//! Transfer Orchestrator
//!
//! Drives each [`TransferFlow`] through its FSM. Flows are independent values
//! addressed by [`FlowHandle`]; one caller works one flow at a time, many
//! flows run concurrently against the shared ledger and guard.
//!
//! # Safety Invariants
//!
//! 1. **Verify before authorize, authorize before submit**: enforced by
//!    [`FlowState::can_transition_to`], never by field presence.
//! 2. **One key per intent**: a flow's idempotency key is fixed at its first
//!    dispatch and reused by every retry.
//! 3. **At-most-once debit**: the ledger call runs inside the idempotency
//!    guard and carries the key as its request id.
//! 4. **Explicit fail rule**: an ambiguous ledger failure is reported as
//!    status-unknown, never as success or as a definite failure.
//! 5. **No cancel after dispatch**: the open/dispatched/cancelled phase of a
//!    flow is a single atomic, so cancel and submit cannot both win. A submit
//!    refused by the guard before dispatching leaves the flow open.
//! 6. **Keys are per caller**: the guard scopes records by the flow's caller
//!    and the ledger request id carries the same owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::flow::{FlowSnapshot, TransferFlow};
use super::state::FlowState;
use super::types::{
    Destination, DestinationKind, FlowHandle, SubmitReceipt, TransferIntent, TransferOutcome,
};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorClass};
use crate::idempotency::{
    Fingerprint, IdempotencyGuard, IdempotencyKey, IdempotencyRecord, KeyGenerator, RecordState,
};
use crate::ledger::{AccountId, AccountLedger, AccountSnapshot, LedgerTransfer, OwnerId};
use crate::money::{self, MinorUnits};
use crate::pin::{PinAuthenticator, validate_pin_format};
use crate::recipient::{
    RecipientResolver, RoutingInfo, VerifiedRecipient, validate_account_number,
};

const PHASE_OPEN: u8 = 0;
const PHASE_DISPATCHED: u8 = 1;
const PHASE_CANCELLED: u8 = 2;

struct FlowSlot {
    flow: Mutex<TransferFlow>,
    phase: AtomicU8,
}

impl FlowSlot {
    fn ensure_live(&self, handle: FlowHandle) -> Result<(), EngineError> {
        if self.phase.load(Ordering::SeqCst) == PHASE_CANCELLED {
            return Err(EngineError::FlowNotFound(handle.to_string()));
        }
        Ok(())
    }
}

pub struct TransferOrchestrator {
    flows: DashMap<FlowHandle, Arc<FlowSlot>>,
    ledger: Arc<dyn AccountLedger>,
    resolver: Arc<RecipientResolver>,
    pins: PinAuthenticator,
    guard: IdempotencyGuard<TransferOutcome>,
    keys: KeyGenerator,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: Arc<dyn AccountLedger>,
        resolver: Arc<RecipientResolver>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            flows: DashMap::new(),
            pins: PinAuthenticator::new(ledger.clone(), config.ledger_timeout()),
            guard: IdempotencyGuard::new(
                clock.clone(),
                config.idempotency_retention(),
                config.ledger_timeout(),
            ),
            keys: KeyGenerator::new(),
            ledger,
            resolver,
            clock,
            config,
        }
    }

    // ========================================================================
    // Flow lifecycle
    // ========================================================================

    /// Open a flow for `source_account_id`, which must belong to `caller`
    pub async fn create_flow(
        &self,
        caller: OwnerId,
        source_account_id: AccountId,
    ) -> Result<FlowHandle, EngineError> {
        let account = self.read_account(source_account_id).await?;
        if account.owner_id != caller {
            warn!(caller, source_account_id, "Transfer from foreign account rejected");
            return Err(EngineError::Forbidden);
        }
        if account.locked {
            return Err(EngineError::AccountLocked);
        }

        let flow = TransferFlow::new(
            caller,
            source_account_id,
            self.config.max_pin_attempts,
            self.clock.now(),
        );
        let handle = flow.handle();
        self.flows.insert(
            handle,
            Arc::new(FlowSlot {
                flow: Mutex::new(flow),
                phase: AtomicU8::new(PHASE_OPEN),
            }),
        );
        info!(flow = %handle, caller, source_account_id, "Transfer flow opened");
        Ok(handle)
    }

    /// Create a flow and run it up to AUTHORIZE
    ///
    /// Fails without leaving a flow behind if the recipient cannot be
    /// verified or the amount is not covered by the balance.
    pub async fn begin(
        &self,
        caller: OwnerId,
        source_account_id: AccountId,
        destination: Destination,
        amount: MinorUnits,
    ) -> Result<FlowHandle, EngineError> {
        self.prepare(caller, source_account_id, destination, amount, true)
            .await
    }

    async fn prepare(
        &self,
        caller: OwnerId,
        source_account_id: AccountId,
        destination: Destination,
        amount: MinorUnits,
        check_balance: bool,
    ) -> Result<FlowHandle, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        validate_account_number(
            destination.account_number.trim(),
            self.config.min_account_number_len,
        )?;

        let handle = self.create_flow(caller, source_account_id).await?;
        let account_number = destination.account_number;
        let kind = self.destination_kind(destination.routing);

        let prepared = async {
            self.select_destination_type(handle, kind).await?;
            self.enter_account_number(handle, &account_number).await?;
            self.verify_recipient(handle).await?;
            self.apply_amount(handle, amount, check_balance).await
        }
        .await;

        if let Err(e) = prepared {
            self.flows.remove(&handle);
            debug!(flow = %handle, error = %e, "Transfer flow discarded");
            return Err(e);
        }
        Ok(handle)
    }

    /// Drive a complete intent: begin, authorize, submit
    ///
    /// A resubmitted intent is matched against the caller's record for its
    /// key before any flow is opened: a completed one is replayed, a failed
    /// one is dispatched again without the balance precheck.
    pub async fn run_intent(
        &self,
        caller: OwnerId,
        intent: TransferIntent,
    ) -> Result<SubmitReceipt, EngineError> {
        let amount = money::parse_decimal(intent.amount, self.config.currency_decimals)?;
        validate_pin_format(&intent.pin_code)?;

        let destination = Destination {
            account_number: intent.destination_account_number,
            routing: intent.destination_routing,
        };
        let mut check_balance = true;
        if let Some(key) = &intent.client_idempotency_key
            && let Some(record) = self.guard.status(caller, key)
        {
            let kind = self.destination_kind(destination.routing.clone());
            let fingerprint = intent_fingerprint(
                intent.source_account_id,
                &kind,
                destination.account_number.trim(),
                amount,
            );
            if record.fingerprint != fingerprint {
                warn!(caller, key = %key, "Idempotency key reused for a different intent");
                return Err(EngineError::KeyReuse);
            }
            match record.state {
                RecordState::Completed(outcome) => {
                    debug!(caller, key = %key, "Replaying completed intent");
                    return Ok(SubmitReceipt {
                        outcome,
                        idempotency_key: key.clone(),
                    });
                }
                RecordState::InFlight => return Err(EngineError::RequestInFlight),
                RecordState::Failed(e) => {
                    info!(caller, key = %key, error = %e, "Resubmitting failed intent");
                    check_balance = false;
                }
            }
        }

        let handle = self
            .prepare(
                caller,
                intent.source_account_id,
                destination,
                amount,
                check_balance,
            )
            .await?;
        self.authorize(handle, &intent.pin_code).await?;
        self.submit(handle, intent.client_idempotency_key).await
    }

    /// Routing naming the home institution is treated as internal
    pub fn destination_kind(&self, routing: Option<RoutingInfo>) -> DestinationKind {
        match routing {
            Some(routing) if !self.resolver.is_internal(Some(&routing)) => {
                DestinationKind::External { routing }
            }
            _ => DestinationKind::Internal,
        }
    }

    // ========================================================================
    // FSM steps
    // ========================================================================

    pub async fn select_destination_type(
        &self,
        handle: FlowHandle,
        kind: DestinationKind,
    ) -> Result<(), EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        let now = self.clock.now();
        flow.transition(FlowState::EnterAccountDetails, now)?;
        flow.clear_destination();
        flow.account_number = None;
        debug!(flow = %handle, kind = ?kind, "Destination type selected");
        flow.destination = Some(kind);
        Ok(())
    }

    /// Record (or edit) the destination account number
    ///
    /// Editing after verification discards the recipient, the amount and any
    /// authorization; the flow must be verified again.
    pub async fn enter_account_number(
        &self,
        handle: FlowHandle,
        account_number: &str,
    ) -> Result<(), EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        if flow.destination.is_none() {
            return Err(EngineError::InvalidStateTransition(
                "destination type not selected".to_string(),
            ));
        }

        let now = self.clock.now();
        flow.transition(FlowState::EnterAccountDetails, now)?;
        if flow.recipient.is_some() {
            info!(flow = %handle, "Destination edited, recipient invalidated");
        }
        flow.clear_destination();
        flow.account_number = Some(account_number.trim().to_string());
        Ok(())
    }

    /// Explicit verification trigger: ENTER_ACCOUNT_DETAILS → RECIPIENT_VERIFIED
    pub async fn verify_recipient(
        &self,
        handle: FlowHandle,
    ) -> Result<VerifiedRecipient, EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        flow.expect_state(FlowState::EnterAccountDetails)?;
        let account_number = flow
            .account_number
            .clone()
            .ok_or(EngineError::MissingDestination)?;
        validate_account_number(&account_number, self.config.min_account_number_len)?;
        let routing = flow
            .destination
            .as_ref()
            .and_then(|d| d.routing())
            .cloned();

        flow.transition(FlowState::AwaitVerification, self.clock.now())?;
        let resolved = self
            .resolver
            .resolve(&account_number, routing.as_ref())
            .await
            .and_then(|recipient| {
                if recipient.internal_account() == Some(flow.source_account_id) {
                    Err(EngineError::SameAccount)
                } else {
                    Ok(recipient)
                }
            });

        let now = self.clock.now();
        match resolved {
            Ok(recipient) => {
                flow.recipient = Some(recipient.clone());
                flow.transition(FlowState::RecipientVerified, now)?;
                info!(flow = %handle, internal = recipient.is_internal, "Recipient verified");
                Ok(recipient)
            }
            Err(e) => {
                flow.transition(FlowState::EnterAccountDetails, now)?;
                debug!(flow = %handle, error = %e, "Recipient verification failed");
                Err(e)
            }
        }
    }

    /// RECIPIENT_VERIFIED → AUTHORIZE once the amount is covered by the balance
    pub async fn set_amount(
        &self,
        handle: FlowHandle,
        amount: MinorUnits,
    ) -> Result<(), EngineError> {
        self.apply_amount(handle, amount, true).await
    }

    async fn apply_amount(
        &self,
        handle: FlowHandle,
        amount: MinorUnits,
        check_balance: bool,
    ) -> Result<(), EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        flow.expect_state(FlowState::RecipientVerified)?;
        if amount == 0 {
            return Err(EngineError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        if check_balance {
            let account = self.read_account(flow.source_account_id).await?;
            if amount > account.available_balance {
                info!(
                    flow = %handle,
                    amount,
                    available = account.available_balance,
                    "Transfer amount exceeds balance"
                );
                return Err(EngineError::InsufficientBalance);
            }
        }

        flow.amount = Some(amount);
        flow.transition(FlowState::Authorize, self.clock.now())?;
        Ok(())
    }

    /// AUTHORIZE → SUBMIT on a matching PIN
    ///
    /// A wrong PIN keeps the flow in AUTHORIZE until the attempt cap; lock or
    /// cap exhaustion fails the flow for good.
    pub async fn authorize(
        &self,
        handle: FlowHandle,
        pin: &str,
    ) -> Result<FlowHandle, EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        if let Some(terminal) = flow.failure().filter(|e| e.is_terminal_for_flow()) {
            return Err(terminal.clone());
        }
        flow.expect_state(FlowState::Authorize)?;

        let source = flow.source_account_id;
        let result = self
            .pins
            .authorize(source, pin, &mut flow.pin_attempts)
            .await;

        let now = self.clock.now();
        match result {
            Ok(()) => {
                flow.transition(FlowState::Submit, now)?;
                info!(flow = %handle, "Transfer authorized");
                Ok(handle)
            }
            Err(e) if e.is_terminal_for_flow() => {
                warn!(flow = %handle, error = %e, "Authorization failed terminally");
                flow.fail(e.clone(), now)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Dispatch the authorized transfer through the idempotency guard
    ///
    /// Calling again after SUCCESS replays the stored outcome.
    pub async fn submit(
        &self,
        handle: FlowHandle,
        key: Option<IdempotencyKey>,
    ) -> Result<SubmitReceipt, EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        if let (Some(existing), Some(supplied)) = (&flow.idempotency_key, &key)
            && existing != supplied
        {
            warn!(flow = %handle, "Submit retried with a different idempotency key");
            return Err(EngineError::IdempotencyKeyChanged);
        }

        match flow.state {
            FlowState::Success => {
                if let (Some(outcome), Some(key)) = (&flow.outcome, &flow.idempotency_key) {
                    debug!(flow = %handle, "Replaying completed submission");
                    return Ok(SubmitReceipt {
                        outcome: outcome.clone(),
                        idempotency_key: key.clone(),
                    });
                }
                return Err(EngineError::InvalidStateTransition(
                    "flow completed without outcome".to_string(),
                ));
            }
            FlowState::Submit => {}
            FlowState::Failed => {
                if let Some(reason) = flow.failure()
                    && reason.is_terminal_for_flow()
                {
                    return Err(reason.clone());
                }
                return Err(EngineError::InvalidStateTransition(
                    "retry from AUTHORIZE before submitting again".to_string(),
                ));
            }
            other => {
                return Err(EngineError::InvalidStateTransition(format!(
                    "cannot submit from {}",
                    other
                )));
            }
        }

        let recipient = flow.recipient.clone().ok_or_else(|| {
            EngineError::InvalidStateTransition("recipient not verified".to_string())
        })?;
        let amount = flow
            .amount
            .ok_or_else(|| EngineError::InvalidAmount("amount not set".to_string()))?;
        let (Some(kind), Some(account_number)) = (&flow.destination, &flow.account_number) else {
            return Err(EngineError::MissingDestination);
        };
        let fingerprint =
            intent_fingerprint(flow.source_account_id, kind, account_number, amount);
        let previously_dispatched = flow.idempotency_key.is_some();
        let key = match (&flow.idempotency_key, key) {
            (Some(existing), _) => existing.clone(),
            (None, Some(supplied)) => supplied,
            (None, None) => self.keys.generate(),
        };

        match slot
            .phase
            .compare_exchange(PHASE_OPEN, PHASE_DISPATCHED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) | Err(PHASE_DISPATCHED) => {}
            Err(_) => return Err(EngineError::FlowNotFound(handle.to_string())),
        }
        flow.idempotency_key = Some(key.clone());

        let caller = flow.caller;
        let request = LedgerTransfer {
            request_id: key.request_id(caller),
            source: flow.source_account_id,
            destination: recipient.destination.clone(),
            amount,
        };

        info!(
            flow = %handle,
            key = %key,
            source = request.source,
            amount,
            internal = recipient.is_internal,
            "Dispatching transfer"
        );
        let result = self
            .guard
            .submit(caller, &key, fingerprint, || async {
                match self.ledger.transfer(&request).await {
                    Ok(receipt) => Ok(TransferOutcome::settled(
                        receipt.reference_id,
                        receipt.settlement,
                        amount,
                    )),
                    Err(e) if e.is_ambiguous() => Err(EngineError::StatusUnknown {
                        idempotency_key: key.to_string(),
                    }),
                    Err(e) => Err(EngineError::from(e)),
                }
            })
            .await;

        let now = self.clock.now();
        match result {
            Ok(outcome) => {
                flow.transition(FlowState::Success, now)?;
                flow.outcome = Some(outcome.clone());
                info!(
                    flow = %handle,
                    key = %key,
                    status = outcome.status.as_str(),
                    reference_id = ?outcome.reference_id,
                    "Transfer submitted"
                );
                Ok(SubmitReceipt {
                    outcome,
                    idempotency_key: key,
                })
            }
            // Nothing was dispatched by this flow; it stays ready to submit
            Err(e) if e.class() == ErrorClass::Conflict => {
                warn!(flow = %handle, key = %key, error = %e, "Submission conflict");
                if !previously_dispatched {
                    flow.idempotency_key = None;
                    let _ = slot.phase.compare_exchange(
                        PHASE_DISPATCHED,
                        PHASE_OPEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
                Err(e)
            }
            Err(e) => {
                warn!(flow = %handle, key = %key, error = %e, "Transfer submission failed");
                flow.fail(e.clone(), now)?;
                Err(e)
            }
        }
    }

    /// FAILED → AUTHORIZE for a non-terminal failure, keeping the flow's key
    pub async fn retry_authorization(
        &self,
        handle: FlowHandle,
        key: Option<IdempotencyKey>,
    ) -> Result<FlowHandle, EngineError> {
        let slot = self.slot(handle)?;
        let mut flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;

        flow.expect_state(FlowState::Failed)?;
        if let Some(terminal) = flow.failure().filter(|e| e.is_terminal_for_flow()) {
            return Err(terminal.clone());
        }
        if let (Some(existing), Some(supplied)) = (&flow.idempotency_key, &key)
            && existing != supplied
        {
            return Err(EngineError::IdempotencyKeyChanged);
        }

        flow.transition(FlowState::Authorize, self.clock.now())?;
        flow.outcome = None;
        info!(flow = %handle, "Transfer returned to authorization");
        Ok(handle)
    }

    /// Abandon a flow that has not been dispatched
    pub fn cancel(&self, handle: FlowHandle) -> Result<(), EngineError> {
        let slot = self.slot(handle)?;
        match slot.phase.compare_exchange(
            PHASE_OPEN,
            PHASE_CANCELLED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.flows.remove(&handle);
                info!(flow = %handle, "Transfer flow cancelled");
                Ok(())
            }
            Err(PHASE_DISPATCHED) => match slot.flow.try_lock() {
                Err(_) => Err(EngineError::SubmissionInProgress),
                Ok(flow) => Err(EngineError::InvalidStateTransition(format!(
                    "cannot cancel after submission, flow is {}",
                    flow.state
                ))),
            },
            Err(_) => Err(EngineError::FlowNotFound(handle.to_string())),
        }
    }

    pub async fn snapshot(&self, handle: FlowHandle) -> Result<FlowSnapshot, EngineError> {
        let slot = self.slot(handle)?;
        let flow = slot.flow.lock().await;
        slot.ensure_live(handle)?;
        Ok(flow.snapshot())
    }

    // ========================================================================
    // Queries & maintenance
    // ========================================================================

    /// Stored result for a submission key supplied by `owner`
    pub fn submission_status(
        &self,
        owner: OwnerId,
        key: &IdempotencyKey,
    ) -> Option<IdempotencyRecord<TransferOutcome>> {
        self.guard.status(owner, key)
    }

    /// Drop idle flows past the flow TTL; returns how many were removed
    pub fn sweep_abandoned(&self) -> usize {
        let cutoff = self.clock.now() - self.config.flow_ttl();
        let before = self.flows.len();
        self.flows.retain(|_, slot| match slot.flow.try_lock() {
            Ok(flow) => flow.updated_at() > cutoff,
            Err(_) => true,
        });
        before.saturating_sub(self.flows.len())
    }

    pub fn purge_idempotency(&self) -> usize {
        self.guard.purge_expired()
    }

    /// Ledger dispatches performed (replays excluded)
    pub fn dispatches(&self) -> u64 {
        self.guard.dispatches()
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    fn slot(&self, handle: FlowHandle) -> Result<Arc<FlowSlot>, EngineError> {
        self.flows
            .get(&handle)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| EngineError::FlowNotFound(handle.to_string()))
    }

    async fn read_account(&self, account_id: AccountId) -> Result<AccountSnapshot, EngineError> {
        tokio::time::timeout(self.config.ledger_timeout(), self.ledger.account(account_id))
            .await
            .map_err(|_| EngineError::Ledger("account read timed out".to_string()))?
            .map_err(EngineError::from)
    }
}

/// Fingerprint of the semantic fields of an intent (never the PIN)
///
/// Built from what the caller asked for, so a resubmission can be matched
/// before its recipient is resolved again.
fn intent_fingerprint(
    source: AccountId,
    kind: &DestinationKind,
    account_number: &str,
    amount: MinorUnits,
) -> Fingerprint {
    let destination = match kind {
        DestinationKind::Internal => format!("int:{}", account_number),
        DestinationKind::External { routing } => {
            format!("ext:{}:{}", routing.institution_code, account_number)
        }
    };
    Fingerprint::of(&[
        "transfer",
        &source.to_string(),
        &destination,
        &amount.to_string(),
    ])
}

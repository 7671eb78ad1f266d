//! End-to-end scenarios through the public `FundsService` API.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use funds_flow::atm::CodeStatus;
use funds_flow::clock::ManualClock;
use funds_flow::config::EngineConfig;
use funds_flow::ledger::{AccountLedger, MemoryAccount, MemoryLedger};
use funds_flow::network::{DirectoryEntry, StaticBankNetwork};
use funds_flow::recipient::RoutingInfo;
use funds_flow::transfer::OutcomeStatus;
use funds_flow::{
    Destination, EngineError, FlowState, FundsService, IdempotencyKey, TransferIntent,
};

const ALICE: u64 = 10;

struct Bank {
    clock: Arc<ManualClock>,
    ledger: Arc<MemoryLedger>,
    funds: Arc<FundsService>,
}

fn account(id: u64, owner: u64, number: &str, balance: u64, used: u64) -> MemoryAccount {
    MemoryAccount {
        account_id: id,
        owner_id: owner,
        account_number: number.to_string(),
        holder_name: format!("Holder {}", id),
        balance,
        pin: "1234".to_string(),
        daily_withdrawal_limit: 100_000,
        daily_withdrawal_used: used,
    }
}

fn bank_with(balance: u64, used: u64) -> Bank {
    let clock = Arc::new(ManualClock::starting_now());
    let ledger = Arc::new(MemoryLedger::with_accounts(
        clock.clone(),
        vec![
            account(1, ALICE, "1000000001", balance, used),
            account(2, 20, "1000000002", 0, 0),
        ],
    ));
    let network = Arc::new(StaticBankNetwork::new(vec![DirectoryEntry {
        institution_code: "058".to_string(),
        institution_name: "Partner Bank".to_string(),
        account_number: "2233445566".to_string(),
        account_name: "Lin Park".to_string(),
    }]));
    let config = EngineConfig {
        resolution_backoff_ms: 1,
        ledger_timeout_ms: 2_000,
        ..EngineConfig::default()
    };
    let funds = Arc::new(FundsService::new(
        ledger.clone(),
        network,
        clock.clone(),
        config,
    ));
    Bank {
        clock,
        ledger,
        funds,
    }
}

fn internal(number: &str) -> Destination {
    Destination {
        account_number: number.to_string(),
        routing: None,
    }
}

fn units(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

fn key(raw: &str) -> IdempotencyKey {
    raw.parse().unwrap()
}

fn intent_to_account_2(amount: i64, idempotency_key: &str) -> TransferIntent {
    TransferIntent {
        source_account_id: 1,
        destination_account_number: "1000000002".to_string(),
        destination_routing: None,
        amount: units(amount),
        pin_code: "1234".to_string(),
        client_idempotency_key: Some(key(idempotency_key)),
    }
}

#[tokio::test]
async fn concurrent_same_key_submissions_debit_once() {
    let bank = bank_with(50_000, 0);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let funds = bank.funds.clone();
        tasks.push(tokio::spawn(async move {
            let handle = funds
                .begin_transfer(ALICE, 1, internal("1000000002"), units(100))
                .await?;
            funds.authorize_transfer(handle, "1234").await?;
            funds.submit_transfer(handle, Some(key("shared-k"))).await
        }));
    }

    for task in tasks {
        match task.await.unwrap() {
            Ok(receipt) => assert_eq!(receipt.outcome.status, OutcomeStatus::Completed),
            Err(e) => assert_eq!(e, EngineError::RequestInFlight),
        }
    }

    assert_eq!(bank.ledger.transfers_applied(), 1);
    assert_eq!(bank.ledger.balance(1), Some(40_000));
    assert_eq!(bank.ledger.balance(2), Some(10_000));
}

#[tokio::test]
async fn insufficient_balance_stops_before_pin_and_ledger() {
    let bank = bank_with(50_000, 0);

    let err = bank
        .funds
        .begin_transfer(ALICE, 1, internal("1000000002"), units(600))
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::InsufficientBalance);
    assert_eq!(bank.ledger.pin_checks(), 0);
    assert_eq!(bank.ledger.transfers_applied(), 0);
}

#[tokio::test]
async fn lost_response_replays_original_outcome() {
    let bank = bank_with(50_000, 0);
    bank.ledger.lose_next_responses(1);

    let handle = bank
        .funds
        .begin_transfer(ALICE, 1, internal("1000000002"), units(100))
        .await
        .unwrap();
    bank.funds.authorize_transfer(handle, "1234").await.unwrap();

    let err = bank
        .funds
        .submit_transfer(handle, Some(key("K1")))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::StatusUnknown {
            idempotency_key: "K1".to_string()
        }
    );
    let snapshot = bank.funds.flow_snapshot(handle).await.unwrap();
    assert_eq!(snapshot.state, FlowState::Failed);
    assert_eq!(snapshot.failure_code, Some("STATUS_UNKNOWN"));

    // a different key for the same intent is refused
    assert_eq!(
        bank.funds
            .retry_authorization(handle, Some(key("K2")))
            .await
            .unwrap_err(),
        EngineError::IdempotencyKeyChanged
    );

    bank.funds
        .retry_authorization(handle, Some(key("K1")))
        .await
        .unwrap();
    bank.funds.authorize_transfer(handle, "1234").await.unwrap();
    let receipt = bank
        .funds
        .submit_transfer(handle, Some(key("K1")))
        .await
        .unwrap();
    assert_eq!(receipt.outcome.status, OutcomeStatus::Completed);
    assert_eq!(bank.ledger.transfers_applied(), 1);
    assert_eq!(bank.ledger.balance(1), Some(40_000));

    let record = bank.funds.submission_status(ALICE, &key("K1")).unwrap();
    assert_eq!(record.status().as_str(), "COMPLETED");
}

#[tokio::test]
async fn resubmitted_intent_after_success_replays() {
    let bank = bank_with(50_000, 0);

    let first = bank
        .funds
        .transfer(ALICE, intent_to_account_2(400, "K1"))
        .await
        .unwrap();
    // The balance no longer covers 400.00; the replay must not care
    let again = bank
        .funds
        .transfer(ALICE, intent_to_account_2(400, "K1"))
        .await
        .unwrap();

    assert_eq!(first, again);
    assert_eq!(again.outcome.status, OutcomeStatus::Completed);
    assert_eq!(bank.ledger.transfers_applied(), 1);
    assert_eq!(bank.ledger.balance(1), Some(10_000));
}

#[tokio::test]
async fn resubmitted_intent_after_lost_response_completes_once() {
    let bank = bank_with(50_000, 0);
    bank.ledger.lose_next_responses(1);

    let err = bank
        .funds
        .transfer(ALICE, intent_to_account_2(400, "K1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::StatusUnknown {
            idempotency_key: "K1".to_string()
        }
    );
    // Applied despite the lost response
    assert_eq!(bank.ledger.balance(1), Some(10_000));

    let receipt = bank
        .funds
        .transfer(ALICE, intent_to_account_2(400, "K1"))
        .await
        .unwrap();
    assert_eq!(receipt.outcome.status, OutcomeStatus::Completed);
    assert_eq!(bank.ledger.transfers_applied(), 1);
    assert_eq!(bank.ledger.balance(1), Some(10_000));
    assert_eq!(bank.ledger.balance(2), Some(40_000));

    let err = bank
        .funds
        .transfer(ALICE, intent_to_account_2(300, "K1"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyReuse);
}

#[tokio::test]
async fn three_wrong_pins_end_the_flow() {
    let bank = bank_with(50_000, 0);
    let handle = bank
        .funds
        .begin_transfer(ALICE, 1, internal("1000000002"), units(10))
        .await
        .unwrap();

    for _ in 0..2 {
        let err = bank.funds.authorize_transfer(handle, "0000").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPin { .. }));
    }
    let err = bank.funds.authorize_transfer(handle, "0000").await.unwrap_err();
    assert_eq!(err, EngineError::PinAttemptsExceeded);

    let snapshot = bank.funds.flow_snapshot(handle).await.unwrap();
    assert_eq!(snapshot.state, FlowState::Failed);
    assert_eq!(snapshot.failure_code, Some("PIN_ATTEMPTS_EXCEEDED"));

    assert!(bank.funds.authorize_transfer(handle, "1234").await.is_err());
    assert!(bank.funds.retry_authorization(handle, None).await.is_err());
    assert_eq!(bank.ledger.transfers_applied(), 0);
}

#[tokio::test]
async fn external_recipient_resolves_through_directory() {
    let bank = bank_with(50_000, 0);
    let routing = RoutingInfo::new("058");

    let recipient = bank
        .funds
        .resolve_recipient("2233445566", Some(&routing))
        .await
        .unwrap();
    assert_eq!(recipient.display_name, "Lin Park");

    let err = bank
        .funds
        .resolve_recipient("9999999999", Some(&routing))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::RecipientNotFound);

    let handle = bank
        .funds
        .begin_transfer(
            ALICE,
            1,
            Destination {
                account_number: "2233445566".to_string(),
                routing: Some(routing),
            },
            units(25),
        )
        .await
        .unwrap();
    bank.funds.authorize_transfer(handle, "1234").await.unwrap();
    let receipt = bank.funds.submit_transfer(handle, None).await.unwrap();

    assert_eq!(receipt.outcome.status, OutcomeStatus::Pending);
    assert_eq!(bank.ledger.balance(1), Some(47_500));
}

#[tokio::test]
async fn editing_destination_requires_fresh_amount() {
    let bank = bank_with(50_000, 0);
    let handle = bank
        .funds
        .begin_transfer(ALICE, 1, internal("1000000002"), units(10))
        .await
        .unwrap();

    let recipient = bank
        .funds
        .edit_destination(
            handle,
            Destination {
                account_number: "2233445566".to_string(),
                routing: Some(RoutingInfo::new("058")),
            },
        )
        .await
        .unwrap();
    assert_eq!(recipient.display_name, "Lin Park");

    let snapshot = bank.funds.flow_snapshot(handle).await.unwrap();
    assert_eq!(snapshot.state, FlowState::RecipientVerified);
    assert_eq!(snapshot.amount, None);

    // no amount, no authorization
    assert!(bank.funds.authorize_transfer(handle, "1234").await.is_err());
    assert_eq!(bank.ledger.pin_checks(), 0);
}

#[tokio::test]
async fn atm_daily_limit_accumulates() {
    let bank = bank_with(100_000, 15_000);

    bank.funds
        .generate_atm_code(ALICE, 1, units(200), None)
        .await
        .unwrap();
    let usage = bank.ledger.daily_withdrawal(1).await.unwrap();
    assert_eq!(usage.used, 35_000);

    let err = bank
        .funds
        .generate_atm_code(ALICE, 1, units(700), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DailyLimitExceeded { .. }));

    let usage = bank.ledger.daily_withdrawal(1).await.unwrap();
    assert_eq!(usage.used, 35_000);
    let active = bank.funds.get_atm_code_status(1).unwrap();
    assert_eq!(active.status, CodeStatus::Active);
    assert_eq!(active.amount, 20_000);
}

#[tokio::test]
async fn atm_code_is_single_active_and_expires() {
    let bank = bank_with(100_000, 0);

    let first = bank
        .funds
        .generate_atm_code(ALICE, 1, units(50), None)
        .await
        .unwrap();
    let second = bank
        .funds
        .generate_atm_code(ALICE, 1, units(60), None)
        .await
        .unwrap();
    assert_ne!(first.code.code, second.code.code);

    let current = bank.funds.get_atm_code_status(1).unwrap();
    assert_eq!(current.code, second.code.code);
    assert_eq!(
        bank.funds.redeem_atm_code(1, &first.code.code).unwrap_err(),
        EngineError::CodeExpired
    );

    bank.clock.advance(Duration::seconds(901));
    let current = bank.funds.get_atm_code_status(1).unwrap();
    assert_eq!(current.status, CodeStatus::Expired);
    assert_eq!(
        bank.funds.redeem_atm_code(1, &second.code.code).unwrap_err(),
        EngineError::CodeExpired
    );
}

#[tokio::test]
async fn atm_code_for_foreign_account_is_forbidden() {
    let bank = bank_with(100_000, 0);
    let err = bank
        .funds
        .generate_atm_code(20, 1, units(10), None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Forbidden);
    assert!(bank.funds.get_atm_code_status(1).is_none());
}

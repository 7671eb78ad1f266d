//! Maintenance Worker
//!
//! Background worker that expires lapsed ATM codes, purges idempotency
//! records past retention and drops abandoned transfer flows.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::service::FundsService;

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub idempotency_purged: usize,
    pub atm_expired: usize,
    pub flows_dropped: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct MaintenanceWorker {
    service: Arc<FundsService>,
    config: WorkerConfig,
}

impl MaintenanceWorker {
    pub fn new(service: Arc<FundsService>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    /// Run the maintenance loop
    ///
    /// This method runs forever, scanning once per `scan_interval`.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            "Starting maintenance worker"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval());
        loop {
            ticker.tick().await;
            let report = self.scan_once();
            if report.is_empty() {
                debug!("Maintenance scan found nothing to do");
            } else {
                info!(
                    idempotency_purged = report.idempotency_purged,
                    atm_expired = report.atm_expired,
                    flows_dropped = report.flows_dropped,
                    "Maintenance scan complete"
                );
            }
        }
    }

    /// Run a single maintenance pass
    pub fn scan_once(&self) -> MaintenanceReport {
        MaintenanceReport {
            atm_expired: self.service.sweep_expired_codes(),
            idempotency_purged: self.service.purge_idempotency(),
            flows_dropped: self.service.sweep_abandoned_flows(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atm::CodeStatus;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::ledger::{MemoryAccount, MemoryLedger};
    use crate::network::ScriptedNetwork;
    use crate::transfer::Destination;
    use rust_decimal::Decimal;

    fn setup() -> (Arc<ManualClock>, Arc<FundsService>, MaintenanceWorker) {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = Arc::new(MemoryLedger::with_accounts(
            clock.clone(),
            vec![
                MemoryAccount {
                    account_id: 1,
                    owner_id: 10,
                    account_number: "1000000001".to_string(),
                    holder_name: "Ada Obi".to_string(),
                    balance: 500_000,
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
        let service = Arc::new(FundsService::new(
            ledger,
            Arc::new(ScriptedNetwork::new(vec![Ok(None)])),
            clock.clone(),
            EngineConfig::default(),
        ));
        let worker = MaintenanceWorker::new(service.clone(), WorkerConfig::default());
        (clock, service, worker)
    }

    #[tokio::test]
    async fn test_scan_on_idle_engine_is_empty() {
        let (_, _, worker) = setup();
        assert!(worker.scan_once().is_empty());
    }

    #[tokio::test]
    async fn test_scan_expires_codes_and_drops_flows() {
        let (clock, service, worker) = setup();
        service
            .generate_atm_code(10, 1, Decimal::new(50, 0), None)
            .await
            .unwrap();
        service
            .begin_transfer(
                10,
                1,
                Destination {
                    account_number: "1000000002".to_string(),
                    routing: None,
                },
                Decimal::new(10, 0),
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(31));
        let report = worker.scan_once();

        assert_eq!(report.atm_expired, 1);
        assert_eq!(report.flows_dropped, 1);
        assert_eq!(report.idempotency_purged, 0);
        assert_eq!(
            service.get_atm_code_status(1).unwrap().status,
            CodeStatus::Expired
        );

        clock.advance(chrono::Duration::hours(24));
        let report = worker.scan_once();
        assert_eq!(report.idempotency_purged, 1);
        assert!(service.get_atm_code_status(1).is_none());
    }
}

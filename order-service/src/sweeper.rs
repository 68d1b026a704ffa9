use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, info};

use crate::checkout::CheckoutOrchestrator;

/// Periodically expires unpaid orders and retries flagged ledger actions.
pub struct OrderSweeper {
    orchestrator: Arc<CheckoutOrchestrator>,
    interval: Duration,
}

impl OrderSweeper {
    pub fn new(orchestrator: Arc<CheckoutOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    pub async fn sweep_once(&self) {
        match self.orchestrator.expire_stale(Utc::now()).await {
            Ok(report) if report.examined > 0 => {
                info!(examined = report.examined, expired = report.expired, "expiry sweep finished")
            }
            Ok(_) => {}
            Err(e) => error!("Error expiring stale orders: {}", e),
        }

        match self.orchestrator.reconcile().await {
            Ok(report) if report.resolved + report.still_open > 0 => info!(
                resolved = report.resolved,
                still_open = report.still_open,
                "reconciliation pass finished"
            ),
            Ok(_) => {}
            Err(e) => error!("Error reconciling ledger actions: {}", e),
        }
    }
}

//! Sync Service - drives the reconciliation engine on a fixed interval

use crate::engine::ReconciliationEngine;
use crate::provider::ChainProvider;
use std::sync::Arc;
use std::time::Duration;
use ticket_ledger::TicketStore;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Periodic sync loop
pub struct SyncService<S, P> {
    engine: Arc<ReconciliationEngine<S, P>>,
    poll_interval: Duration,
    deadline: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Stops a running [`SyncService`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the current pass
    pub fn shutdown(&self) {
        // Receiver gone means the loop already stopped
        let _ = self.sender.send(true);
    }
}

impl<S, P> SyncService<S, P>
where
    S: TicketStore + 'static,
    P: ChainProvider + 'static,
{
    /// Create service plus the handle that stops it
    pub fn new(engine: Arc<ReconciliationEngine<S, P>>) -> (Self, ShutdownHandle) {
        let (sender, shutdown) = watch::channel(false);
        let config = engine.config();
        let service = Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            deadline: Duration::from_millis(config.sync_timeout_ms.max(1)),
            engine,
            shutdown,
        };
        (
            service,
            ShutdownHandle {
                sender: Arc::new(sender),
            },
        )
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run passes until shutdown. A failed pass is logged and retried on the next tick.
    pub async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            deadline_ms = self.deadline.as_millis() as u64,
            "Starting sync loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || self.stopping() {
                        break;
                    }
                    continue;
                }
            }

            if self.stopping() {
                break;
            }

            match self.engine.sync_with_deadline(self.deadline).await {
                Ok(outcome) if !outcome.inconsistencies.is_empty() => {
                    info!(
                        confirmed_block = outcome.confirmed_block,
                        inconsistencies = outcome.inconsistencies.len(),
                        "Sync pass finished with inconsistencies"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Sync pass failed, retrying next tick"),
            }
        }

        info!("Sync loop stopped");
    }
}

//! Accepts a batch of orders and submits each to the saga orchestrator
//! with bounded concurrency, reporting outcomes as sagas reach a terminal
//! state. Bounded concurrency follows the same semaphore-gated shape as
//! the workspace's bulkhead resilience pattern, generalized here from a
//! single acquire-execute-release call to a spawned worker per order.

use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{OrderId, OrderStatus};
use marketplace_saga::SagaEnvironment;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// The customer-visible result of driving one order's saga to a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    /// Every line item was reserved and confirmed.
    Completed,
    /// The saga compensated cleanly; no stock was left held.
    Cancelled,
    /// The saga timed out or hit an unrecoverable compensation failure.
    Failed,
}

impl OrderOutcome {
    const fn from_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Completed => Self::Completed,
            OrderStatus::Cancelled => Self::Cancelled,
            OrderStatus::Created
            | OrderStatus::Reserving
            | OrderStatus::AllReserved
            | OrderStatus::Confirming
            | OrderStatus::Compensating
            | OrderStatus::Failed => Self::Failed,
        }
    }
}

/// One order's final disposition, for the supplier to consume.
#[derive(Debug, Clone)]
pub struct OrderReport {
    /// The order this report describes.
    pub order_id: OrderId,
    /// Its final outcome.
    pub outcome: OrderOutcome,
    /// Whether the saga's overall deadline forced compensation rather
    /// than the saga reaching a terminal state on its own.
    pub timed_out: bool,
}

/// Drives a bounded-concurrency worker pool over a stream of orders.
pub struct OrderPipeline {
    env: SagaEnvironment,
    saga_timeout: Duration,
    worker_permits: Arc<Semaphore>,
    order_delay: Duration,
}

impl OrderPipeline {
    /// Build a pipeline that runs at most `worker_count` sagas
    /// concurrently, each bounded by `saga_timeout`, with `order_delay`
    /// paced between successive submissions.
    #[must_use]
    pub fn new(env: SagaEnvironment, saga_timeout: Duration, worker_count: usize, order_delay: Duration) -> Self {
        Self {
            env,
            saga_timeout,
            worker_permits: Arc::new(Semaphore::new(worker_count.max(1))),
            order_delay,
        }
    }

    /// Submit every order in `orders`, reporting each outcome on
    /// `report_tx` as its saga reaches a terminal state. Stops accepting
    /// new orders once `shutdown` resolves, then gives in-flight sagas
    /// `grace` to finish before abandoning whatever remains.
    pub async fn run(
        &self,
        orders: Vec<marketplace_core::Order>,
        report_tx: mpsc::UnboundedSender<OrderReport>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        grace: Duration,
    ) {
        let mut tasks = JoinSet::new();
        let mut orders = orders.into_iter();

        loop {
            if *shutdown.borrow() {
                tracing::info!("pipeline stopping acceptance of new orders, shutdown requested");
                break;
            }
            let Some(order) = orders.next() else {
                break;
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    tracing::info!("pipeline stopping acceptance of new orders, shutdown requested");
                    break;
                }
                permit = Arc::clone(&self.worker_permits).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };

            let order_id = order.order_id.clone();
            let env = self.env.clone();
            let saga_timeout = self.saga_timeout;
            let report_tx = report_tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = marketplace_saga::run_saga(order, env, saga_timeout).await;
                let report = OrderReport {
                    order_id: order_id.clone(),
                    outcome: OrderOutcome::from_status(outcome.data.order.status),
                    timed_out: outcome.timed_out,
                };
                tracing::info!(%order_id, outcome = ?report.outcome, timed_out = report.timed_out, "order reached a terminal state");
                let _ = report_tx.send(report);
            });

            if !self.order_delay.is_zero() {
                tokio::time::sleep(self.order_delay).await;
            }
        }

        drain(tasks, grace).await;
    }
}

async fn drain(mut tasks: JoinSet<()>, grace: Duration) {
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(abandoned = tasks.len(), "shutdown grace period elapsed, abandoning remaining in-flight orders");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_status_maps_to_completed_outcome() {
        assert_eq!(OrderOutcome::from_status(OrderStatus::Completed), OrderOutcome::Completed);
    }

    #[test]
    fn cancelled_status_maps_to_cancelled_outcome() {
        assert_eq!(OrderOutcome::from_status(OrderStatus::Cancelled), OrderOutcome::Cancelled);
    }

    #[test]
    fn any_non_terminal_or_failed_status_maps_to_failed_outcome() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Reserving,
            OrderStatus::AllReserved,
            OrderStatus::Confirming,
            OrderStatus::Compensating,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderOutcome::from_status(status), OrderOutcome::Failed);
        }
    }
}

//! Drives one saga from submission to a terminal state, and recovers
//! whatever sagas were still in flight when the coordinator process last
//! stopped.

use std::sync::Arc;
use std::time::Duration;

use marketplace_core::{Clock, Order, SagaId};
use marketplace_runtime::Store;

use crate::environment::SagaEnvironment;
use crate::model::{SagaAction, SagaData};
use crate::orchestrator::SagaReducer;

/// A saga driven to completion: its final snapshot and the total wall time
/// spent, for the caller to report or log.
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    /// The saga's state at the point it stopped changing.
    pub data: SagaData,
    /// Whether the overall deadline elapsed before the saga reached a
    /// terminal state on its own.
    pub timed_out: bool,
}

/// Submit a fresh order to the two-phase reserve/confirm saga, enforcing
/// `saga_timeout` as the overall deadline.
///
/// `Store::send` recursively awaits every effect a transition produces
/// before returning, so wrapping just the initial dispatch in
/// [`tokio::time::timeout`] is enough: when the deadline elapses, every
/// outstanding seller call still in flight is dropped at its next await
/// point, and the trailing `TimedOut` dispatch drives the saga into
/// compensation from wherever it was left.
pub async fn run_saga(order: Order, env: SagaEnvironment, saga_timeout: Duration) -> SagaOutcome {
    let now = env.clock.now();
    let initial = SagaData::new(order, now);
    let saga_id = initial.saga_id;
    let store: Store<SagaData, SagaAction, SagaEnvironment, SagaReducer> =
        Store::new(initial, SagaReducer, env.clone());

    let deadline_elapsed = tokio::time::timeout(saga_timeout, store.send(SagaAction::BeginReserve)).await.is_err();

    if deadline_elapsed {
        let still_running = store.state(|data| !data.is_terminal()).await;
        if still_running {
            tracing::warn!(%saga_id, "saga exceeded its overall deadline, forcing compensation");
            store.send(SagaAction::TimedOut).await;
        }
    }

    let data = store.state(Clone::clone).await;
    SagaOutcome { timed_out: deadline_elapsed, data }
}

/// Reload every persisted saga snapshot and drive each one to a terminal
/// state. Every non-terminal saga is forced through compensation: once a
/// coordinator process has restarted there is no reliable way to tell
/// whether an in-flight RESERVE or CONFIRM the old process issued actually
/// landed, so the safe default is to unwind every reservation the snapshot
/// recorded and let the order fail rather than risk double-confirming
/// stock the customer never received notice of.
///
/// # Errors
///
/// Returns the underlying [`crate::store::SagaStoreError`] if the snapshot
/// directory cannot be read.
pub async fn recover_all(
    env: &SagaEnvironment,
) -> Result<Vec<SagaOutcome>, crate::store::SagaStoreError> {
    let snapshots = env.store.load_all().await?;
    let mut outcomes = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        if snapshot.is_terminal() {
            continue;
        }
        outcomes.push(resume_one(snapshot, env.clone()).await);
    }
    Ok(outcomes)
}

async fn resume_one(snapshot: SagaData, env: SagaEnvironment) -> SagaOutcome {
    let saga_id = snapshot.saga_id;
    tracing::info!(%saga_id, state = ?snapshot.state, "resuming saga from persisted snapshot");
    let store: Store<SagaData, SagaAction, SagaEnvironment, SagaReducer> =
        Store::new(snapshot, SagaReducer, env);
    store.send(SagaAction::Resume).await;
    let data = store.state(Clone::clone).await;
    SagaOutcome { data, timed_out: false }
}

/// Look up a recovered saga's identifier, for log correlation.
#[must_use]
pub fn saga_id_of(outcome: &SagaOutcome) -> SagaId {
    outcome.data.saga_id
}

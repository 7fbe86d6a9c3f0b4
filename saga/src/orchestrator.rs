//! The saga's pure transition function: given the current [`SagaData`] and
//! an incoming [`SagaAction`], decide the next state and the effects the
//! driver should run. No I/O happens here directly — every RESERVE,
//! CONFIRM, CANCEL, and persistence call is wrapped in an [`Effect`] so
//! `reduce` stays synchronous and unit-testable, generalizing the
//! workspace's `checkout-saga` example reducer from simulated effects to
//! real transport calls.

use marketplace_core::{
    Clock, CompensationAction, Effect, OrderStatus, ProductId, Reducer, ReservationId, SagaState, SellerId,
};

use crate::calls::{cancel_reservation, confirm_reservation, reserve_item};
use crate::environment::SagaEnvironment;
use crate::model::{ItemKey, SagaAction, SagaData};

/// Drives one saga instance through the reserve → confirm → (compensate)
/// state machine.
#[derive(Debug, Default)]
pub struct SagaReducer;

impl Reducer for SagaReducer {
    type State = SagaData;
    type Action = SagaAction;
    type Environment = SagaEnvironment;

    fn reduce(&self, state: &mut SagaData, action: SagaAction, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
        match action {
            SagaAction::BeginReserve => begin_reserve(state, env),
            SagaAction::ReserveSucceeded { seller_id, product_id, reservation_id } => {
                on_reserve_succeeded(state, env, seller_id, product_id, reservation_id)
            }
            SagaAction::ReserveFailed { seller_id, product_id, reason } => {
                on_reserve_failed(state, env, seller_id, product_id, reason)
            }
            SagaAction::BeginConfirm => begin_confirm(state, env),
            SagaAction::ConfirmSucceeded { seller_id, product_id } => {
                on_confirm_succeeded(state, env, seller_id, product_id)
            }
            SagaAction::ConfirmFailed { seller_id, product_id, reason } => {
                on_confirm_failed(state, env, seller_id, product_id, reason)
            }
            SagaAction::BeginCompensation { reason } => begin_compensation(state, env, reason),
            SagaAction::CompensationFinished => on_compensation_finished(state, env),
            SagaAction::TimedOut => on_timed_out(state, env),
            SagaAction::Resume => on_resume(state, env),
        }
    }
}

fn persist(env: &SagaEnvironment, snapshot: SagaData) -> Effect<SagaAction> {
    let store = std::sync::Arc::clone(&env.store);
    Effect::future(async move {
        if let Err(error) = store.save(snapshot).await {
            tracing::warn!(%error, "saga snapshot persistence failed; next periodic flush will retry");
        }
        None
    })
}

fn delete(env: &SagaEnvironment, saga_id: marketplace_core::SagaId) -> Effect<SagaAction> {
    let store = std::sync::Arc::clone(&env.store);
    Effect::future(async move {
        if let Err(error) = store.delete(saga_id).await {
            tracing::warn!(%error, %saga_id, "saga snapshot deletion failed");
        }
        None
    })
}

fn dispatch(action: SagaAction) -> Effect<SagaAction> {
    Effect::future(async move { Some(action) })
}

fn begin_reserve(state: &mut SagaData, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
    let now = env.clock.now();
    if !state.transition(SagaState::Reserving, now) {
        return vec![Effect::None];
    }
    state.order.status = OrderStatus::Reserving;
    state.pending = state
        .order
        .items
        .iter()
        .map(|item| (item.seller_id.clone(), item.product_id.clone()))
        .collect();

    let reserve_effects: Vec<Effect<SagaAction>> = state
        .order
        .items
        .iter()
        .map(|item| {
            let env = env.clone();
            let order_id = state.order.order_id.clone();
            let seller_id = item.seller_id.clone();
            let product_id = item.product_id.clone();
            let quantity = item.quantity;
            Effect::future(async move {
                match reserve_item(&env, order_id, seller_id.clone(), product_id.clone(), quantity).await {
                    Ok(reservation_id) => {
                        Some(SagaAction::ReserveSucceeded { seller_id, product_id, reservation_id })
                    }
                    Err(error) => {
                        tracing::warn!(%error, seller = %seller_id, product = %product_id, "reserve failed");
                        Some(SagaAction::ReserveFailed { seller_id, product_id, reason: error.to_string() })
                    }
                }
            })
        })
        .collect();

    vec![persist(env, state.clone()), Effect::Parallel(reserve_effects)]
}

fn on_reserve_succeeded(
    state: &mut SagaData,
    env: &SagaEnvironment,
    seller_id: SellerId,
    product_id: ProductId,
    reservation_id: ReservationId,
) -> Vec<Effect<SagaAction>> {
    match state.state {
        SagaState::Reserving => {
            record_reservation(state, env, seller_id.clone(), product_id.clone(), reservation_id);
            let key: ItemKey = (seller_id, product_id);
            state.pending.remove(&key);
            state.updated_at = env.clock.now();
            if state.pending.is_empty() {
                if let Some(reason) = state.failure_reason.clone() {
                    return vec![persist(env, state.clone()), dispatch(SagaAction::BeginCompensation { reason })];
                }
                let now = env.clock.now();
                if state.transition(SagaState::ProductsReserved, now) {
                    state.order.status = OrderStatus::AllReserved;
                }
                return vec![persist(env, state.clone()), dispatch(SagaAction::BeginConfirm)];
            }
            vec![persist(env, state.clone())]
        }
        SagaState::Compensating => {
            // The compensation sweep already ran (a sibling item failed,
            // or the saga timed out) but this RESERVE's success response
            // only just arrived. Record it and cancel it immediately since
            // the sweep already passed this reservation by.
            record_reservation(state, env, seller_id.clone(), product_id.clone(), reservation_id);
            let order_id = state.order.order_id.clone();
            let env_clone = env.clone();
            let ad_hoc = Effect::future(async move {
                if let Err(error) = cancel_reservation(&env_clone, order_id, seller_id.clone(), reservation_id).await
                {
                    tracing::warn!(%error, seller = %seller_id, %reservation_id, "late-arriving reservation could not be cancelled after compensation swept past it");
                }
                None
            });
            vec![persist(env, state.clone()), ad_hoc]
        }
        _ => vec![Effect::None],
    }
}

fn record_reservation(
    state: &mut SagaData,
    _env: &SagaEnvironment,
    seller_id: SellerId,
    product_id: ProductId,
    reservation_id: ReservationId,
) {
    state.reservations.insert((seller_id.clone(), product_id), reservation_id);
    state.compensations.push(CompensationAction::CancelReservation { seller_id, reservation_id });
}

fn on_reserve_failed(
    state: &mut SagaData,
    env: &SagaEnvironment,
    seller_id: SellerId,
    product_id: ProductId,
    reason: String,
) -> Vec<Effect<SagaAction>> {
    if state.state != SagaState::Reserving {
        return vec![Effect::None];
    }
    let key: ItemKey = (seller_id, product_id);
    state.pending.remove(&key);
    state.failure_reason.get_or_insert(reason);
    state.updated_at = env.clock.now();
    if state.pending.is_empty() {
        #[allow(clippy::unwrap_used)]
        let reason = state.failure_reason.clone().unwrap();
        return vec![persist(env, state.clone()), dispatch(SagaAction::BeginCompensation { reason })];
    }
    vec![persist(env, state.clone())]
}

fn begin_confirm(state: &mut SagaData, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
    let now = env.clock.now();
    if !state.transition(SagaState::Confirming, now) {
        return vec![Effect::None];
    }
    state.order.status = OrderStatus::Confirming;
    state.failure_reason = None;
    state.pending = state.reservations.keys().cloned().collect();

    let confirm_effects: Vec<Effect<SagaAction>> = state
        .reservations
        .iter()
        .map(|((seller_id, product_id), reservation_id)| {
            let env = env.clone();
            let order_id = state.order.order_id.clone();
            let seller_id = seller_id.clone();
            let product_id = product_id.clone();
            let reservation_id = *reservation_id;
            Effect::future(async move {
                match confirm_reservation(&env, order_id, seller_id.clone(), reservation_id).await {
                    Ok(()) => Some(SagaAction::ConfirmSucceeded { seller_id, product_id }),
                    Err(error) => {
                        tracing::warn!(%error, seller = %seller_id, product = %product_id, "confirm failed");
                        Some(SagaAction::ConfirmFailed { seller_id, product_id, reason: error.to_string() })
                    }
                }
            })
        })
        .collect();

    vec![persist(env, state.clone()), Effect::Parallel(confirm_effects)]
}

fn on_confirm_succeeded(
    state: &mut SagaData,
    env: &SagaEnvironment,
    seller_id: SellerId,
    product_id: ProductId,
) -> Vec<Effect<SagaAction>> {
    if state.state != SagaState::Confirming {
        return vec![Effect::None];
    }
    let key: ItemKey = (seller_id, product_id);
    state.pending.remove(&key);
    state.updated_at = env.clock.now();
    if state.pending.is_empty() {
        if let Some(reason) = state.failure_reason.clone() {
            return vec![persist(env, state.clone()), dispatch(SagaAction::BeginCompensation { reason })];
        }
        let now = env.clock.now();
        if state.transition(SagaState::Completed, now) {
            state.order.status = OrderStatus::Completed;
        }
        let saga_id = state.saga_id;
        return vec![persist(env, state.clone()), delete(env, saga_id)];
    }
    vec![persist(env, state.clone())]
}

fn on_confirm_failed(
    state: &mut SagaData,
    env: &SagaEnvironment,
    seller_id: SellerId,
    product_id: ProductId,
    reason: String,
) -> Vec<Effect<SagaAction>> {
    if state.state != SagaState::Confirming {
        return vec![Effect::None];
    }
    let key: ItemKey = (seller_id, product_id);
    state.pending.remove(&key);
    state.failure_reason.get_or_insert(reason);
    state.updated_at = env.clock.now();
    if state.pending.is_empty() {
        #[allow(clippy::unwrap_used)]
        let reason = state.failure_reason.clone().unwrap();
        return vec![persist(env, state.clone()), dispatch(SagaAction::BeginCompensation { reason })];
    }
    vec![persist(env, state.clone())]
}

fn begin_compensation(state: &mut SagaData, env: &SagaEnvironment, reason: String) -> Vec<Effect<SagaAction>> {
    let now = env.clock.now();
    if state.state.is_terminal() {
        return vec![Effect::None];
    }
    if !state.transition(SagaState::Compensating, now) {
        return vec![Effect::None];
    }
    state.order.status = OrderStatus::Compensating;
    state.failure_reason = Some(reason);
    state.pending.clear();

    vec![persist(env, state.clone()), compensation_sweep(state, env)]
}

/// Cancel every recorded reservation in reverse order, regardless of
/// whether the attempt's outcome is still unknown from a prior process's
/// perspective. Shared by the first compensation pass and by recovery,
/// which re-runs the sweep for a saga that was already compensating when
/// the coordinator restarted.
fn compensation_sweep(state: &SagaData, env: &SagaEnvironment) -> Effect<SagaAction> {
    let order_id = state.order.order_id.clone();
    let compensations = state.compensations.clone();
    let env_clone = env.clone();
    Effect::future(async move {
        let tasks = compensations.into_iter().rev().map(|action| {
            let env = env_clone.clone();
            let order_id = order_id.clone();
            async move {
                let CompensationAction::CancelReservation { seller_id, reservation_id } = action;
                if let Err(error) = cancel_reservation(&env, order_id, seller_id.clone(), reservation_id).await {
                    tracing::warn!(%error, seller = %seller_id, %reservation_id, "compensation cancel failed, continuing sweep");
                }
            }
        });
        futures::future::join_all(tasks).await;
        Some(SagaAction::CompensationFinished)
    })
}

fn on_compensation_finished(state: &mut SagaData, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
    if state.state != SagaState::Compensating {
        return vec![Effect::None];
    }
    let now = env.clock.now();
    if state.triggered_by_timeout {
        if state.transition(SagaState::Failed, now) {
            state.order.status = OrderStatus::Failed;
        }
    } else if state.transition(SagaState::CompensationCompleted, now) {
        state.order.status = OrderStatus::Cancelled;
    }
    let saga_id = state.saga_id;
    vec![persist(env, state.clone()), delete(env, saga_id)]
}

fn on_timed_out(state: &mut SagaData, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
    if state.state.is_terminal() || state.state == SagaState::Compensating {
        return vec![Effect::None];
    }
    state.triggered_by_timeout = true;
    begin_compensation(state, env, "saga timed out".to_string())
}

fn on_resume(state: &mut SagaData, env: &SagaEnvironment) -> Vec<Effect<SagaAction>> {
    if state.state.is_terminal() {
        return vec![Effect::None];
    }
    if state.state == SagaState::Compensating {
        return vec![compensation_sweep(state, env)];
    }
    begin_compensation(state, env, "saga resumed from a persisted snapshot after a restart".to_string())
}


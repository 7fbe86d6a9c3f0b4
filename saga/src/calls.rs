//! The three network calls the orchestrator makes against a seller —
//! RESERVE, CONFIRM, CANCEL — each wrapped in that peer's circuit breaker
//! and the retry engine, and bounded by the per-phase deadline.

use std::time::Duration;

use marketplace_core::{Envelope, MessageKind, OrderId, Payload, ProductId, ReservationId, SellerId};
use marketplace_runtime::retry_with_classify;

use crate::environment::SagaEnvironment;
use crate::error::CallError;

/// Send `envelope` to `seller_id` through the breaker, reusing the same
/// envelope — and therefore the same message ID — on every call. The
/// transport mints a fresh correlation ID per attempt; the message ID
/// stays stable so the seller's idempotency cache recognizes a retry of
/// the same logical request instead of applying it twice.
async fn call(env: &SagaEnvironment, seller_id: &SellerId, envelope: &Envelope) -> Result<Envelope, CallError> {
    let breaker = env.breakers.get(seller_id).await;
    let sender = &env.sender;
    let timeout = env.request_timeout;
    let response = breaker
        .call(|| sender.send_with_envelope(seller_id, envelope.clone(), timeout))
        .await
        .map_err(|e| CallError::from_breaker(seller_id.as_str(), e))?;
    interpret(seller_id, response)
}

fn interpret(seller_id: &SellerId, envelope: Envelope) -> Result<Envelope, CallError> {
    match envelope.kind {
        MessageKind::Success => Ok(envelope),
        MessageKind::Error => {
            let reason = match &envelope.payload {
                Payload::Error { reason } => reason.clone(),
                _ => "peer returned an error with no reason".to_string(),
            };
            Err(CallError::Transport(marketplace_transport::TransportError::PeerError {
                peer: seller_id.to_string(),
                reason,
            }))
        }
        other => Err(CallError::Transport(marketplace_transport::TransportError::MalformedFrame {
            peer: seller_id.to_string(),
            reason: format!("unexpected response kind {other:?}"),
        })),
    }
}

async fn with_phase_deadline<T>(
    phase_timeout: Duration,
    seller_id: &SellerId,
    fut: impl std::future::Future<Output = Result<T, CallError>>,
) -> Result<T, CallError> {
    match tokio::time::timeout(phase_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Transport(marketplace_transport::TransportError::Timeout {
            peer: seller_id.to_string(),
        })),
    }
}

/// Issue a RESERVE for `quantity` units of `product_id` against
/// `seller_id`, retrying transient failures until the phase deadline
/// elapses.
///
/// # Errors
///
/// Returns the last [`CallError`] seen: a terminal peer/breaker error, or
/// a timeout once the phase deadline elapses.
pub async fn reserve_item(
    env: &SagaEnvironment,
    order_id: OrderId,
    seller_id: SellerId,
    product_id: ProductId,
    quantity: u32,
) -> Result<ReservationId, CallError> {
    let policy = env.retry_policy.clone();
    let request = Envelope::request(
        MessageKind::Reserve,
        seller_id.clone(),
        Some(order_id),
        Payload::Reserve { product_id: product_id.clone(), quantity },
        chrono::Utc::now(),
    );
    let fut = retry_with_classify(&policy, || call(env, &seller_id, &request), CallError::is_retryable);
    let envelope = with_phase_deadline(env.phase_timeout, &seller_id, fut).await?;
    match envelope.payload {
        Payload::ReservedOk { reservation_id } => Ok(reservation_id),
        _ => Err(CallError::Transport(marketplace_transport::TransportError::MalformedFrame {
            peer: seller_id.to_string(),
            reason: "SUCCESS response to RESERVE missing reservation id".to_string(),
        })),
    }
}

/// Issue a CONFIRM for `reservation_id` against `seller_id`.
///
/// # Errors
///
/// Returns the last [`CallError`] seen: a terminal peer/breaker error
/// (including an expired or already-confirmed reservation), or a timeout.
pub async fn confirm_reservation(
    env: &SagaEnvironment,
    order_id: OrderId,
    seller_id: SellerId,
    reservation_id: ReservationId,
) -> Result<(), CallError> {
    let policy = env.retry_policy.clone();
    let request = Envelope::request(
        MessageKind::Confirm,
        seller_id.clone(),
        Some(order_id),
        Payload::Confirm { reservation_id },
        chrono::Utc::now(),
    );
    let fut = retry_with_classify(&policy, || call(env, &seller_id, &request), CallError::is_retryable);
    with_phase_deadline(env.phase_timeout, &seller_id, fut).await?;
    Ok(())
}

/// Issue a CANCEL for `reservation_id` against `seller_id`. Used by the
/// compensation sweep; failures are the caller's to log, not propagate, so
/// one stuck peer doesn't stop the rest of the sweep from running.
///
/// # Errors
///
/// Returns the last [`CallError`] seen.
pub async fn cancel_reservation(
    env: &SagaEnvironment,
    order_id: OrderId,
    seller_id: SellerId,
    reservation_id: ReservationId,
) -> Result<(), CallError> {
    let policy = env.retry_policy.clone();
    let request = Envelope::request(
        MessageKind::Cancel,
        seller_id.clone(),
        Some(order_id),
        Payload::Cancel { reservation_id },
        chrono::Utc::now(),
    );
    let fut = retry_with_classify(&policy, || call(env, &seller_id, &request), CallError::is_retryable);
    with_phase_deadline(env.phase_timeout, &seller_id, fut).await?;
    Ok(())
}

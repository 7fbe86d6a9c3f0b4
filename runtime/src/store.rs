//! The generic driver loop: holds state behind a lock, feeds actions
//! through a [`Reducer`], and spawns the effects it returns.

use std::sync::Arc;

use marketplace_core::{Effect, Reducer};
use tokio::sync::RwLock;
use tokio::task::JoinError;

/// Errors raised while executing effects.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An effect's future panicked or was cancelled.
    #[error("effect task join error: {0}")]
    EffectJoin(#[from] JoinError),
}

/// Drives a single [`Reducer`] instance: owns its state, dispatches
/// actions, and executes the effects each transition returns, feeding
/// resulting actions back in.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    S: Send + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
    R: Reducer<State = S, Action = A, Environment = E> + 'static,
{
    /// Construct a store around an initial state, a reducer, and its
    /// environment.
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
        }
    }

    /// Dispatch `action`, running the reducer and then executing every
    /// effect it returns. Effects that resolve to a follow-up action are
    /// dispatched recursively.
    pub async fn send(&self, action: A) {
        let effects = {
            let mut guard = self.state.write().await;
            let start = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut guard, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds").record(start.elapsed());
            effects
        };
        for effect in effects {
            self.execute_effect(effect).await;
        }
    }

    /// Execute a single effect, recursively dispatching any action it
    /// produces back through this store.
    #[allow(clippy::only_used_in_recursion)]
    pub fn execute_effect<'a>(
        &'a self,
        effect: Effect<A>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match effect {
                Effect::None => {}
                Effect::Parallel(effects) => {
                    let futures = effects.into_iter().map(|e| self.execute_effect(e));
                    futures::future::join_all(futures).await;
                }
                Effect::Sequential(effects) => {
                    for e in effects {
                        self.execute_effect(e).await;
                    }
                }
                Effect::Delay { duration, action } => {
                    tokio::time::sleep(duration).await;
                    self.send(*action).await;
                }
                Effect::Future(fut) => {
                    if let Some(action) = fut.await {
                        self.send(action).await;
                    }
                }
            }
        })
    }

    /// Read the current state through a projection closure.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Replace the current state wholesale. Used by saga recovery to seed a
    /// store from a persisted snapshot.
    pub async fn set_state(&self, new_state: S) {
        let mut guard = self.state.write().await;
        *guard = new_state;
    }
}

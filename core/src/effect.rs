//! The effect tree a [`crate::reducer::Reducer`] returns from a transition.
//!
//! An [`Effect`] describes work the driver should perform *after* a state
//! transition has been committed, without the reducer itself touching I/O.
//! This keeps `reduce` synchronous, deterministic, and trivially testable;
//! all asynchrony lives in the futures an effect wraps.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A unit of work produced by a reducer, carrying zero or more follow-up
/// actions back into the driving loop.
pub enum Effect<Action> {
    /// Nothing to do.
    None,
    /// Run every child effect concurrently; order of resulting actions is
    /// not guaranteed.
    Parallel(Vec<Effect<Action>>),
    /// Run every child effect in order, waiting for each to complete before
    /// starting the next.
    Sequential(Vec<Effect<Action>>),
    /// Dispatch `action` back into the driver after `duration` has elapsed.
    Delay {
        /// How long to wait before dispatching.
        duration: Duration,
        /// The action to dispatch once the delay elapses.
        action: Box<Action>,
    },
    /// An arbitrary asynchronous computation that may produce a follow-up
    /// action. Returning `None` means the effect completed without
    /// triggering further state transitions.
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
}

impl<Action> fmt::Debug for Effect<Action> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "Effect::None"),
            Self::Parallel(effects) => {
                write!(f, "Effect::Parallel({} effects)", effects.len())
            }
            Self::Sequential(effects) => {
                write!(f, "Effect::Sequential({} effects)", effects.len())
            }
            Self::Delay { duration, .. } => {
                write!(f, "Effect::Delay({duration:?})")
            }
            Self::Future(_) => write!(f, "Effect::Future(..)"),
        }
    }
}

impl<Action> Effect<Action> {
    /// Wrap a plain async block as a future effect.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Option<Action>> + Send + 'static,
    {
        Self::Future(Box::pin(fut))
    }

    /// Combine this effect with another, running both concurrently.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, other) => other,
            (this, Self::None) => this,
            (Self::Parallel(mut a), Self::Parallel(b)) => {
                a.extend(b);
                Self::Parallel(a)
            }
            (Self::Parallel(mut a), other) => {
                a.push(other);
                Self::Parallel(a)
            }
            (this, Self::Parallel(mut b)) => {
                b.insert(0, this);
                Self::Parallel(b)
            }
            (this, other) => Self::Parallel(vec![this, other]),
        }
    }

    /// Chain this effect before another, running this one to completion
    /// first.
    #[must_use]
    pub fn chain(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, other) => other,
            (this, Self::None) => this,
            (Self::Sequential(mut a), Self::Sequential(b)) => {
                a.extend(b);
                Self::Sequential(a)
            }
            (Self::Sequential(mut a), other) => {
                a.push(other);
                Self::Sequential(a)
            }
            (this, other) => Self::Sequential(vec![this, other]),
        }
    }

    /// Transform the follow-up action type produced by this effect.
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        Action: 'static,
        B: 'static,
        F: Fn(Action) -> B + Send + Sync + Clone + 'static,
    {
        match self {
            Effect::None => Effect::None,
            Effect::Parallel(effects) => Effect::Parallel(
                effects.into_iter().map(|e| e.map(f.clone())).collect(),
            ),
            Effect::Sequential(effects) => Effect::Sequential(
                effects.into_iter().map(|e| e.map(f.clone())).collect(),
            ),
            Effect::Delay { duration, action } => Effect::Delay {
                duration,
                action: Box::new(f(*action)),
            },
            Effect::Future(fut) => Effect::Future(Box::pin(async move {
                let result = fut.await;
                result.map(f)
            })),
        }
    }
}

/// Apply `f` to every action a collection of effects might eventually
/// produce, flattening the result into a single effect.
pub fn map_effects<A, B, F>(effects: Vec<Effect<A>>, f: F) -> Effect<B>
where
    A: 'static,
    B: 'static,
    F: Fn(A) -> B + Send + Sync + Clone + 'static,
{
    Effect::Parallel(effects.into_iter().map(|e| e.map(f.clone())).collect())
}

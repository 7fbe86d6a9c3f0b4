//! The pure transition-function seam every driver in this workspace is
//! built around.

use crate::effect::Effect;

/// A pure state transition function: given the current state, an incoming
/// action, and a read-only environment, produce the next state (mutated in
/// place) and a list of effects for the driver to execute.
///
/// Implementations must not perform I/O directly; side effects are
/// expressed as returned [`Effect`] values so the transition itself stays
/// synchronous and unit-testable.
pub trait Reducer: Send + Sync {
    /// The state this reducer mutates.
    type State: Send;
    /// The action vocabulary this reducer accepts.
    type Action: Send + 'static;
    /// Read-only dependencies (clocks, clients, configuration) the
    /// transition may consult while building effects.
    type Environment: Send + Sync;

    /// Apply `action` to `state`, returning the effects the driver should
    /// run as a consequence.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        environment: &Self::Environment,
    ) -> Vec<Effect<Self::Action>>;
}

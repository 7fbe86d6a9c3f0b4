//! The two-phase reserve/confirm saga orchestrator: a pure state machine
//! (`orchestrator`, `model`) driven by the workspace's generic
//! [`marketplace_runtime::Store`], making its RESERVE/CONFIRM/CANCEL calls
//! through `calls` against whatever [`marketplace_transport::RequestSender`]
//! the caller supplies, and persisting every transition through `store`.

pub mod calls;
pub mod driver;
pub mod environment;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod store;

pub use driver::{recover_all, run_saga, SagaOutcome};
pub use environment::{BreakerRegistry, SagaEnvironment};
pub use error::{CallError, SagaError};
pub use model::{ItemKey, SagaAction, SagaData};
pub use orchestrator::SagaReducer;
pub use store::{FileSagaStore, SagaStore, SagaStoreError};

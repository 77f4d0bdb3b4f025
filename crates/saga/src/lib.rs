//! Saga orchestration.
//!
//! A saga is an ordered list of steps. Each step may send a forward command
//! and may send a compensating command. The [`Orchestrator`] sends the first
//! command on start and then advances on every reply it receives on the
//! saga's reply topic. When a step fails, the steps before it are
//! compensated in reverse order.
//!
//! Saga instances are persisted through an [`event_store::SagaStore`] in the
//! same transaction as the commands they send, so a reply is either fully
//! processed or not at all.

pub mod context;
pub mod definition;
pub mod error;
pub mod orchestrator;
pub mod repository;
pub mod state;

pub use context::SagaContext;
pub use definition::{ActionFn, ReplyHandlerFn, SagaDefinition, SagaStep, StepCommand, StepDecision};
pub use error::{Result, SagaError};
pub use orchestrator::Orchestrator;
pub use repository::SagaRepository;
pub use state::SagaState;

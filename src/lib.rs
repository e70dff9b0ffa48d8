//! Long-Running Actions for saga-style distributed transactions
//!
//! Participants expose complete/compensate/status/forget callbacks which the
//! [`TerminationEngine`] invokes on behalf of a coordinator. The
//! [`Orchestrator`] drives a unit of work through an action, and [`Current`]
//! carries the active action ids along each call chain.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Implement the capabilities your participant supports
//! impl Completer for Hotel { /* ... */ }
//! impl Compensator for Hotel { /* ... */ }
//!
//! // 2. Discover participants
//! let registry = Arc::new(ParticipantRegistry::new());
//! registry.discover(vec![
//!     Candidate::shared("Hotel", Arc::new(Hotel::default()))
//!         .completer(Signature::with_action(ReturnKind::Unit))
//!         .compensator(Signature::with_action(ReturnKind::Unit))
//!         .scan(),
//! ])?;
//!
//! // 3. Answer coordinator callbacks
//! let engine = TerminationEngine::new(registry.clone(), Handle::current());
//! let answer = engine.compensate("Hotel", &tx, None)?.into_response();
//!
//! // 4. Run work inside an action
//! let mut orchestrator = Orchestrator::new(client, registry, OrchestratorConfig::default());
//! orchestrator.run(None, &["Hotel"], |id| async move { book(id).await }).await?;
//! ```

// === Core Types ===
mod context;
mod errors;
mod idempotency;
mod status;

// === Participants ===
mod deferred;
mod descriptor;
mod registry;
mod traits;

// === Termination ===
mod engine;
mod links;

// === Propagation ===
mod propagation;

// === Orchestration ===
mod config;
mod coordinator;
mod orchestrator;

// === Observability ===
mod observer;
mod stats;

#[cfg(any(test, feature = "test-harness"))]
pub mod testing;

// === Re-exports ===

// Types
pub use context::{ActionId, ContextFrame, Current};
pub use idempotency::{InvocationKey, KeyedLocks};
pub use status::{LraStatus, Operation, ParticipantStatus, ProtocolResponse, Termination};

// Errors
pub use errors::{
    ContextError, CoordinatorError, DefinitionError, EngineError, HandlerError, OrchestratorError,
    RegistryError,
};

// Participants
pub use deferred::{Completion, Deferred, PendingOutcome, PendingState};
pub use descriptor::{
    Callback, Candidate, Instance, InstanceMode, ParamKind, ParticipantDescriptor, ReturnKind,
    ScannedCandidate, Signature,
};
pub use registry::{discover, ParticipantRegistry};
pub use traits::{
    CallArgs, Compensator, Completer, CoordinatorClient, Forgetter, HandlerOutput, HandlerResult,
    StatusProvider,
};

// Termination
pub use engine::TerminationEngine;
pub use links::{callback_url, parse_callback_url, parse_link_header, EnlistmentLinks, RESOURCE_PATH};

// Propagation
pub use propagation::{
    read_context_header, read_parent_header, write_context_header, LRA_HTTP_CONTEXT_HEADER,
    LRA_HTTP_PARENT_CONTEXT_HEADER,
};

// Orchestration
pub use config::OrchestratorConfig;
pub use coordinator::{Enlistment, InMemoryCoordinator, LraData};
pub use orchestrator::{Orchestrator, OrchestratorState};

// Observability
pub use observer::{LraObserver, NoOpObserver, TracingObserver};
pub use stats::{EngineStats, EngineStatsSnapshot};

//! Error types for participant definition, termination and orchestration

use crate::{ActionId, Operation, ProtocolResponse};

/// A participant violates the structural callback contract.
///
/// Fatal: raised at discovery or on first invocation and never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{owner}::{operation}: invalid number of arguments: {count}")]
    Arity {
        owner: Box<str>,
        operation: Operation,
        count: usize,
    },
    #[error("{owner}::{operation}: argument {index} has unsupported type {found}")]
    ParameterType {
        owner: Box<str>,
        operation: Operation,
        index: usize,
        found: Box<str>,
    },
    #[error("{owner}::{operation}: unsupported return type {found}")]
    ReturnType {
        owner: Box<str>,
        operation: Operation,
        found: Box<str>,
    },
    #[error("{owner}::{operation}: bound more than once")]
    DuplicateBinding { owner: Box<str>, operation: Operation },
    #[error("{owner}::{operation}: invalid type of returned object: expected {expected}, got {found}")]
    UnexpectedReturn {
        owner: Box<str>,
        operation: Operation,
        expected: Box<str>,
        found: Box<str>,
    },
}

/// Error raised by a participant callback
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The participant chose the exact protocol response to return
    #[error("participant responded with status {}", .0.status)]
    Protocol(ProtocolResponse),
    /// Unexpected failure inside the participant
    #[error("participant failed: {0}")]
    Failed(Box<str>),
}

impl HandlerError {
    pub fn failed(reason: impl Into<Box<str>>) -> Self {
        Self::Failed(reason.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Participant not found: {0}")]
    NotFound(Box<str>),
}

/// Failure of a termination call that is not a participant outcome
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    NotFound(#[from] RegistryError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("no call chain is active on this task")]
    NoActiveChain,
    #[error("context stack is empty")]
    EmptyFrame,
    #[error("invalid context header: {0}")]
    InvalidHeader(Box<str>),
}

/// Errors surfaced by a coordinator client
#[derive(Clone, Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(Box<str>),
    #[error("Action not found: {0}")]
    NotFound(ActionId),
    #[error("Coordinator rejected {id}: {reason}")]
    Rejected { id: ActionId, reason: Box<str> },
}

/// Errors from driving one unit of work
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError<E> {
    #[error("failed to start action: {0}")]
    Start(CoordinatorError),
    #[error("failed to enlist {owner}: {reason}")]
    Enlist { owner: Box<str>, reason: Box<str> },
    #[error("failed to close {id}: {source}")]
    Close { id: ActionId, source: CoordinatorError },
    #[error("work failed: {0}")]
    Work(E),
    #[error("orchestrator has already ended")]
    Ended,
}

impl<E> OrchestratorError<E> {
    /// Whether the caller's own work raised this error
    pub fn is_work_failure(&self) -> bool {
        matches!(self, Self::Work(_))
    }
}

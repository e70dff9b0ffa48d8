//! Participant capability traits and the coordinator client seam

use crate::{ActionId, CoordinatorError, Deferred, HandlerError, LraStatus, ParticipantStatus, ProtocolResponse};
use async_trait::async_trait;
use std::time::Duration;

/// What a participant callback hands back before normalization
#[derive(Debug)]
pub enum HandlerOutput {
    /// Finished without a value
    Unit,
    /// Explicit participant status
    Status(ParticipantStatus),
    /// Raw protocol response, passed through verbatim
    Response(ProtocolResponse),
    /// Result arrives later
    Deferred(Deferred),
}

impl HandlerOutput {
    /// Name of the variant as used in definition errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Status(_) => "status",
            Self::Response(_) => "response",
            Self::Deferred(_) => "deferred",
        }
    }
}

impl From<ParticipantStatus> for HandlerOutput {
    fn from(status: ParticipantStatus) -> Self {
        Self::Status(status)
    }
}

impl From<ProtocolResponse> for HandlerOutput {
    fn from(response: ProtocolResponse) -> Self {
        Self::Response(response)
    }
}

impl From<Deferred> for HandlerOutput {
    fn from(deferred: Deferred) -> Self {
        Self::Deferred(deferred)
    }
}

pub type HandlerResult = Result<HandlerOutput, HandlerError>;

/// Arguments passed to a callback, shaped by the arity it declared
#[derive(Clone, Copy, Debug)]
pub enum CallArgs<'a> {
    None,
    Action(&'a ActionId),
    ActionAndParent(&'a ActionId, Option<&'a ActionId>),
}

impl<'a> CallArgs<'a> {
    pub(crate) fn for_arity(arity: usize, tx: &'a ActionId, parent: Option<&'a ActionId>) -> Self {
        match arity {
            0 => Self::None,
            1 => Self::Action(tx),
            _ => Self::ActionAndParent(tx, parent),
        }
    }

    /// The action id, when the callback asked for it
    pub fn action(&self) -> Option<&'a ActionId> {
        match self {
            Self::None => None,
            Self::Action(tx) | Self::ActionAndParent(tx, _) => Some(tx),
        }
    }

    /// The parent id, when the callback asked for it and the action is nested
    pub fn parent(&self) -> Option<&'a ActionId> {
        match self {
            Self::ActionAndParent(_, parent) => *parent,
            _ => None,
        }
    }
}

/// Finalizes the participant's work when the action closes
pub trait Completer: Send + Sync + 'static {
    fn complete(&self, args: CallArgs<'_>) -> HandlerResult;
}

/// Undoes the participant's work when the action is cancelled
pub trait Compensator: Send + Sync + 'static {
    fn compensate(&self, args: CallArgs<'_>) -> HandlerResult;
}

/// Reports progress of a complete/compensate that answered "in progress"
pub trait StatusProvider: Send + Sync + 'static {
    fn status(&self, args: CallArgs<'_>) -> HandlerResult;
}

/// Releases residual state once the coordinator no longer needs it
pub trait Forgetter: Send + Sync + 'static {
    fn forget(&self, args: CallArgs<'_>) -> HandlerResult;
}

/// Client surface of the coordinator consumed by the orchestrator.
///
/// The coordinator is authoritative for action status; implementations talk
/// to it over whatever transport the deployment uses.
#[async_trait]
pub trait CoordinatorClient: Send + Sync + 'static {
    /// Allocate a new action, optionally nested under `parent`
    async fn start(
        &self,
        client_id: &str,
        timeout: Duration,
        parent: Option<&ActionId>,
    ) -> Result<ActionId, CoordinatorError>;

    /// Close the action; participants get completed
    async fn close(&self, id: &ActionId) -> Result<LraStatus, CoordinatorError>;

    /// Cancel the action; participants get compensated
    async fn cancel(&self, id: &ActionId) -> Result<LraStatus, CoordinatorError>;

    /// Enlist a participant advertised by `link_header`.
    ///
    /// Returns the recovery URL the coordinator assigned to the enlistment.
    async fn join(
        &self,
        id: &ActionId,
        timeout: Duration,
        link_header: &str,
        recovery_url: Option<&str>,
        data: Option<&str>,
    ) -> Result<Box<str>, CoordinatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_args_follow_arity() {
        let tx = ActionId::new("tx");
        let parent = ActionId::new("parent");

        let none = CallArgs::for_arity(0, &tx, Some(&parent));
        assert!(none.action().is_none());

        let one = CallArgs::for_arity(1, &tx, Some(&parent));
        assert_eq!(one.action(), Some(&tx));
        assert!(one.parent().is_none());

        let two = CallArgs::for_arity(2, &tx, Some(&parent));
        assert_eq!(two.parent(), Some(&parent));
    }

    #[test]
    fn test_output_kinds() {
        assert_eq!(HandlerOutput::Unit.kind(), "unit");
        assert_eq!(HandlerOutput::from(ParticipantStatus::Active).kind(), "status");
        assert_eq!(HandlerOutput::from(ProtocolResponse::ok()).kind(), "response");
    }
}

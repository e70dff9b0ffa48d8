//! Participant status, protocol responses and termination outcomes

use serde::{Deserialize, Serialize};

/// The four termination operations a participant may expose
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Finalize the participant's effect
    Complete,
    /// Undo the participant's effect
    Compensate,
    /// Report progress of an earlier complete/compensate
    Status,
    /// Release residual state after the action ended
    Forget,
}

impl Operation {
    /// All operations in advertisement order
    pub const ALL: [Operation; 4] = [
        Operation::Complete,
        Operation::Compensate,
        Operation::Status,
        Operation::Forget,
    ];

    /// Path segment / link relation name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Compensate => "compensate",
            Self::Status => "status",
            Self::Forget => "forget",
        }
    }

    /// Parse a link relation name
    pub fn from_rel(rel: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == rel)
    }

    /// Outcome reported when the operation finished without a value
    pub(crate) fn terminal_success(&self) -> Termination {
        match self {
            Self::Complete => Termination::Status(ParticipantStatus::Completed),
            Self::Compensate => Termination::Status(ParticipantStatus::Compensated),
            Self::Status | Self::Forget => Termination::Done,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant-side status of its part in an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantStatus {
    Active,
    Completing,
    Compensating,
    Completed,
    Compensated,
    FailedToComplete,
    FailedToCancel,
}

impl ParticipantStatus {
    /// Still working on a complete/compensate request
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Completing | Self::Compensating)
    }

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Completing => "Completing",
            Self::Compensating => "Compensating",
            Self::Completed => "Completed",
            Self::Compensated => "Compensated",
            Self::FailedToComplete => "FailedToComplete",
            Self::FailedToCancel => "FailedToCancel",
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Active,
            Self::Completing,
            Self::Compensating,
            Self::Completed,
            Self::Compensated,
            Self::FailedToComplete,
            Self::FailedToCancel,
        ]
        .into_iter()
        .find(|s| s.name() == name)
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw protocol-level response (status code plus optional text body)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    pub status: u16,
    pub body: Option<Box<str>>,
}

impl ProtocolResponse {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const NOT_FOUND: u16 = 404;
    pub const GONE: u16 = 410;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    /// Response with the given status and no body
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Attach a text body
    pub fn with_body(mut self, body: impl Into<Box<str>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn ok() -> Self {
        Self::new(Self::OK)
    }

    pub fn accepted() -> Self {
        Self::new(Self::ACCEPTED)
    }

    pub fn not_found() -> Self {
        Self::new(Self::NOT_FOUND)
    }

    pub fn server_error() -> Self {
        Self::new(Self::INTERNAL_SERVER_ERROR)
    }

    /// 202 marks "still in progress"
    pub fn is_accepted(&self) -> bool {
        self.status == Self::ACCEPTED
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Normalized answer of a termination call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Participant reported (or was mapped to) a status
    Status(ParticipantStatus),
    /// Work continues asynchronously; poll again later
    Accepted,
    /// Succeeded with nothing to report
    Done,
    /// Participant supplied its own protocol response
    Response(ProtocolResponse),
}

impl Termination {
    /// Still in progress from the coordinator's point of view
    pub fn is_in_progress(&self) -> bool {
        match self {
            Self::Accepted => true,
            Self::Status(s) => s.is_in_progress(),
            Self::Response(r) => r.is_accepted(),
            Self::Done => false,
        }
    }

    /// Map onto the wire response returned to the coordinator
    pub fn into_response(self) -> ProtocolResponse {
        match self {
            Self::Status(status) => ProtocolResponse::ok().with_body(status.name()),
            Self::Accepted => ProtocolResponse::accepted(),
            Self::Done => ProtocolResponse::ok(),
            Self::Response(response) => response,
        }
    }
}

/// Coordinator-side status of an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LraStatus {
    Active,
    Closing,
    Closed,
    Cancelling,
    Cancelled,
    FailedToClose,
    FailedToCancel,
}

impl LraStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Cancelled | Self::FailedToClose | Self::FailedToCancel
        )
    }
}

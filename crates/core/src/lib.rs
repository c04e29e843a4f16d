pub mod aggregate;
pub mod config;
pub mod domain;
pub mod events;
pub mod gate;

pub use aggregate::aggregate;
pub use domain::round::{
    ApprovalRound, ApproverAssignment, ApproverResponse, Comment, CommentId, ContainerId,
    Decision, EntityRef, RoundId, RoundStatus, UserId,
};
pub use events::{EventSink, InMemoryEventSink, RoundEvent, RoundEventKind, TracingEventSink};
pub use gate::{
    AccessDecision, AccessDenial, AccessRole, AuthorizationGate, InMemoryMembershipDirectory,
    MembershipDirectory,
};

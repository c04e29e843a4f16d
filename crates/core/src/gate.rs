use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::round::{ApprovalRound, ApproverAssignment, RoundStatus, UserId};

/// Minimum role a user must hold on a round's container for an access
/// check to pass. Ordering matters: a Contributor grant satisfies a Viewer
/// requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRole {
    Viewer,
    Contributor,
}

/// Membership/role collaborator, external to this core. Implementations
/// answer whether a user holds at least `min_role` on a container.
pub trait MembershipDirectory {
    fn has_container_access(
        &self,
        user_id: &UserId,
        container_id: &str,
        min_role: AccessRole,
    ) -> Result<bool, String>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryMembershipDirectory {
    grants: HashMap<(String, String), AccessRole>,
}

impl InMemoryMembershipDirectory {
    pub fn grant(
        mut self,
        user_id: impl Into<String>,
        container_id: impl Into<String>,
        role: AccessRole,
    ) -> Self {
        self.grants.insert((user_id.into(), container_id.into()), role);
        self
    }
}

impl MembershipDirectory for InMemoryMembershipDirectory {
    fn has_container_access(
        &self,
        user_id: &UserId,
        container_id: &str,
        min_role: AccessRole,
    ) -> Result<bool, String> {
        Ok(self
            .grants
            .get(&(user_id.0.clone(), container_id.to_string()))
            .is_some_and(|granted| *granted >= min_role))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessDenial {
    NotRoundOwner { user_id: String },
    RoundNotDraft { status: RoundStatus },
    RoundNotSubmitted { status: RoundStatus },
    NoApproversAssigned,
    NotAssignedApprover { user_id: String },
    NoContainerAccess { user_id: String, container_id: String },
    MembershipLookupFailed { detail: String },
}

impl AccessDenial {
    pub fn reason(&self) -> String {
        match self {
            Self::NotRoundOwner { user_id } => {
                format!("user `{user_id}` does not own this round")
            }
            Self::RoundNotDraft { status } => {
                format!("round is {status:?}, only Draft rounds can be submitted")
            }
            Self::RoundNotSubmitted { status } => {
                format!("round is {status:?}, only Submitted rounds accept responses")
            }
            Self::NoApproversAssigned => "round has no assigned approvers".to_string(),
            Self::NotAssignedApprover { user_id } => {
                format!("user `{user_id}` is not an assigned approver for this round")
            }
            Self::NoContainerAccess { user_id, container_id } => {
                format!("user `{user_id}` has no access to container `{container_id}`")
            }
            Self::MembershipLookupFailed { detail } => {
                format!("membership lookup failed: {detail}")
            }
        }
    }

    /// Denials caused by the round's current status rather than by who the
    /// caller is. The controller reports these as invalid-state failures.
    pub fn is_state_denial(&self) -> bool {
        matches!(self, Self::RoundNotDraft { .. } | Self::RoundNotSubmitted { .. })
    }

    /// Structural requirement unmet, independent of caller and status.
    pub fn is_precondition_denial(&self) -> bool {
        matches!(self, Self::NoApproversAssigned)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub denial: Option<AccessDenial>,
}

impl AccessDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), denial: None }
    }

    fn deny(denial: AccessDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), denial: Some(denial) }
    }
}

/// Answers "may user U perform action A on round R?" by combining round
/// membership (owner/approver roster) with the external role hierarchy.
/// All checks are synchronous and side-effect-free.
#[derive(Clone, Debug)]
pub struct AuthorizationGate<M> {
    membership: M,
}

impl<M> AuthorizationGate<M>
where
    M: MembershipDirectory,
{
    pub fn new(membership: M) -> Self {
        Self { membership }
    }

    pub fn can_submit(
        &self,
        user_id: &UserId,
        round: &ApprovalRound,
        assignments: &[ApproverAssignment],
    ) -> AccessDecision {
        if !round.is_owner(user_id) {
            return AccessDecision::deny(AccessDenial::NotRoundOwner {
                user_id: user_id.0.clone(),
            });
        }

        if round.status != RoundStatus::Draft {
            return AccessDecision::deny(AccessDenial::RoundNotDraft { status: round.status });
        }

        if assignments.is_empty() {
            return AccessDecision::deny(AccessDenial::NoApproversAssigned);
        }

        AccessDecision::allow(format!("user `{}` owns this draft round", user_id.0))
    }

    pub fn can_respond(
        &self,
        user_id: &UserId,
        round: &ApprovalRound,
        assignments: &[ApproverAssignment],
    ) -> AccessDecision {
        if !is_assigned(user_id, assignments) {
            return AccessDecision::deny(AccessDenial::NotAssignedApprover {
                user_id: user_id.0.clone(),
            });
        }

        if round.status != RoundStatus::Submitted {
            return AccessDecision::deny(AccessDenial::RoundNotSubmitted { status: round.status });
        }

        AccessDecision::allow(format!("user `{}` is an assigned approver", user_id.0))
    }

    pub fn can_comment(
        &self,
        user_id: &UserId,
        round: &ApprovalRound,
        assignments: &[ApproverAssignment],
    ) -> AccessDecision {
        self.participant_or_container_access(user_id, round, assignments, AccessRole::Contributor)
    }

    pub fn can_view(
        &self,
        user_id: &UserId,
        round: &ApprovalRound,
        assignments: &[ApproverAssignment],
    ) -> AccessDecision {
        self.participant_or_container_access(user_id, round, assignments, AccessRole::Viewer)
    }

    fn participant_or_container_access(
        &self,
        user_id: &UserId,
        round: &ApprovalRound,
        assignments: &[ApproverAssignment],
        min_role: AccessRole,
    ) -> AccessDecision {
        if round.is_owner(user_id) {
            return AccessDecision::allow(format!("user `{}` owns this round", user_id.0));
        }

        if is_assigned(user_id, assignments) {
            return AccessDecision::allow(format!("user `{}` is an assigned approver", user_id.0));
        }

        match self.membership.has_container_access(user_id, &round.container_id.0, min_role) {
            Ok(true) => AccessDecision::allow(format!(
                "user `{}` holds container access on `{}`",
                user_id.0, round.container_id.0
            )),
            Ok(false) => AccessDecision::deny(AccessDenial::NoContainerAccess {
                user_id: user_id.0.clone(),
                container_id: round.container_id.0.clone(),
            }),
            Err(detail) => AccessDecision::deny(AccessDenial::MembershipLookupFailed { detail }),
        }
    }
}

fn is_assigned(user_id: &UserId, assignments: &[ApproverAssignment]) -> bool {
    assignments.iter().any(|assignment| &assignment.user_id == user_id)
}

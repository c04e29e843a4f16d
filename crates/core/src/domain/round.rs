use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

/// Opaque key for the record under review. The engine never dereferences
/// it; the owning feature is responsible for passing real identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Draft,
    Submitted,
    Approved,
    Declined,
    RevisionRequested,
}

impl RoundStatus {
    /// A terminal round accepts no further responses. The entity's journey
    /// may still continue through a new round.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::RevisionRequested)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Approved rounds are final for the entity; only Declined and
    /// RevisionRequested permit a follow-up round.
    pub fn is_reopenable(self) -> bool {
        matches!(self, Self::Declined | Self::RevisionRequested)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Declined,
    RevisionRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRound {
    pub id: RoundId,
    pub entity: EntityRef,
    pub container_id: ContainerId,
    pub round_number: u32,
    pub status: RoundStatus,
    pub owner_id: UserId,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRound {
    pub fn is_owner(&self, user_id: &UserId) -> bool {
        &self.owner_id == user_id
    }
}

/// One named reviewer on a round's roster. The roster is frozen once the
/// round leaves Draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverAssignment {
    pub round_id: RoundId,
    pub user_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverResponse {
    pub round_id: RoundId,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub responded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub round_id: RoundId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::RoundStatus;

    #[test]
    fn draft_and_submitted_are_open() {
        assert!(RoundStatus::Draft.is_open());
        assert!(RoundStatus::Submitted.is_open());
        assert!(!RoundStatus::Approved.is_open());
    }

    #[test]
    fn only_declined_and_revision_requested_are_reopenable() {
        assert!(RoundStatus::Declined.is_reopenable());
        assert!(RoundStatus::RevisionRequested.is_reopenable());
        assert!(!RoundStatus::Approved.is_reopenable());
        assert!(!RoundStatus::Draft.is_reopenable());
        assert!(!RoundStatus::Submitted.is_reopenable());
    }
}

use std::collections::{HashMap, HashSet};

use crate::domain::round::{ApproverAssignment, ApproverResponse, Decision, RoundStatus};

/// Derives a round's overall status from its roster and the responses
/// recorded so far.
///
/// Declined and RevisionRequested are veto signals and dominate any number
/// of approvals; full approval requires a response of Approved from every
/// assigned approver. Responses from users outside the roster never count.
pub fn aggregate(assignments: &[ApproverAssignment], responses: &[ApproverResponse]) -> RoundStatus {
    if assignments.is_empty() {
        return RoundStatus::Draft;
    }

    let roster: HashSet<&str> =
        assignments.iter().map(|assignment| assignment.user_id.0.as_str()).collect();
    let decisions: HashMap<&str, Decision> = responses
        .iter()
        .filter(|response| roster.contains(response.approver_id.0.as_str()))
        .map(|response| (response.approver_id.0.as_str(), response.decision))
        .collect();

    if decisions.values().any(|decision| *decision == Decision::Declined) {
        return RoundStatus::Declined;
    }

    if decisions.values().any(|decision| *decision == Decision::RevisionRequested) {
        return RoundStatus::RevisionRequested;
    }

    if roster.iter().all(|approver| decisions.get(approver) == Some(&Decision::Approved)) {
        return RoundStatus::Approved;
    }

    RoundStatus::Submitted
}

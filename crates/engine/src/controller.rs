use chrono::Utc;
use uuid::Uuid;

use signoff_core::aggregate::aggregate;
use signoff_core::domain::round::{
    ApprovalRound, ApproverAssignment, ApproverResponse, Comment, CommentId, ContainerId,
    Decision, EntityRef, RoundId, RoundStatus, UserId,
};
use signoff_core::events::{EventSink, RoundEvent, RoundEventKind};
use signoff_core::gate::{AccessDecision, AuthorizationGate, MembershipDirectory};
use signoff_db::store::RoundStore;
use signoff_db::StoreError;

use crate::errors::WorkflowError;

#[derive(Clone, Debug)]
pub struct CreateRound {
    pub entity: EntityRef,
    pub container_id: ContainerId,
    pub owner_id: UserId,
    pub approver_ids: Vec<UserId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundDetails {
    pub round: ApprovalRound,
    pub assignments: Vec<ApproverAssignment>,
    pub responses: Vec<ApproverResponse>,
    pub comments: Vec<Comment>,
}

/// Orchestrates gate, store and aggregator. Every operation is a single
/// transaction; lifecycle events are emitted only after a successful
/// commit, so a sink failure can never roll anything back.
pub struct WorkflowController<M, E> {
    store: RoundStore,
    gate: AuthorizationGate<M>,
    events: E,
    respond_retry_attempts: u32,
}

impl<M, E> WorkflowController<M, E>
where
    M: MembershipDirectory,
    E: EventSink,
{
    pub fn new(store: RoundStore, gate: AuthorizationGate<M>, events: E) -> Self {
        Self { store, gate, events, respond_retry_attempts: 3 }
    }

    pub fn with_respond_retry_attempts(mut self, attempts: u32) -> Self {
        self.respond_retry_attempts = attempts.max(1);
        self
    }

    pub async fn create_round(&self, request: CreateRound) -> Result<ApprovalRound, WorkflowError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        if let Some(open) = RoundStore::open_round_tx(&mut tx, &request.entity).await? {
            return Err(WorkflowError::invalid_state(format!(
                "entity already has an open round `{}` (round {})",
                open.id.0, open.round_number
            )));
        }

        let round_number = RoundStore::latest_round_tx(&mut tx, &request.entity)
            .await?
            .map_or(1, |latest| latest.round_number + 1);

        let round = self.insert_new_round(&mut tx, &request, round_number).await?;
        tx.commit().await.map_err(StoreError::from)?;

        tracing::info!(
            event_name = "approval.round.created",
            round_id = %round.id.0,
            entity_type = %round.entity.entity_type,
            entity_id = %round.entity.entity_id,
            round_number = round.round_number,
            approvers = request.approver_ids.len(),
            "approval round created"
        );
        self.emit(RoundEventKind::RoundCreated, &round);

        Ok(round)
    }

    pub async fn submit(
        &self,
        round_id: &RoundId,
        caller_id: &UserId,
    ) -> Result<ApprovalRound, WorkflowError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        let round = Self::require_round(&mut tx, round_id).await?;
        let assignments = RoundStore::assignments_tx(&mut tx, round_id).await?;
        check(self.gate.can_submit(caller_id, &round, &assignments))?;

        // For an all-pending response set the aggregate is Submitted.
        let status = aggregate(&assignments, &[]);
        let now = Utc::now();
        let applied =
            RoundStore::update_status(&mut tx, round_id, round.version, status, now).await?;
        if !applied {
            return Err(WorkflowError::ConcurrencyConflict { attempts: 1 });
        }
        tx.commit().await.map_err(StoreError::from)?;

        let round = ApprovalRound {
            status,
            version: round.version + 1,
            updated_at: now,
            ..round
        };

        tracing::info!(
            event_name = "approval.round.submitted",
            round_id = %round.id.0,
            entity_type = %round.entity.entity_type,
            entity_id = %round.entity.entity_id,
            approvers = assignments.len(),
            "approval round submitted for review"
        );
        self.emit(RoundEventKind::RoundUpdated, &round);

        Ok(round)
    }

    /// Records (or replaces) one approver's decision and recomputes the
    /// round status in the same transaction. An attempt that loses a
    /// write race (stale version on the status write, or a busy/locked
    /// database) is retried on a fresh transaction, a bounded number of
    /// times.
    pub async fn respond(
        &self,
        round_id: &RoundId,
        approver_id: &UserId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalRound, WorkflowError> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.respond_attempt(round_id, approver_id, decision, comment.clone()).await {
                Ok(Some(round)) => {
                    tracing::info!(
                        event_name = "approval.round.responded",
                        round_id = %round.id.0,
                        approver_id = %approver_id.0,
                        decision = ?decision,
                        status = ?round.status,
                        attempts,
                        "approver decision recorded"
                    );
                    self.emit(RoundEventKind::RoundUpdated, &round);

                    return Ok(round);
                }
                // Stale version: another transaction recomputed the
                // status between our read and our write.
                Ok(None) => {}
                // Busy/locked: a concurrent writer held the database, or
                // our read snapshot went stale before the first write.
                Err(WorkflowError::Storage(error)) if error.is_busy() => {}
                Err(error) => return Err(error),
            }

            if attempts >= self.respond_retry_attempts {
                return Err(WorkflowError::ConcurrencyConflict { attempts });
            }
        }
    }

    /// One transactional attempt at recording a response. `Ok(None)`
    /// means the versioned status write hit a stale version and nothing
    /// was committed.
    async fn respond_attempt(
        &self,
        round_id: &RoundId,
        approver_id: &UserId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Option<ApprovalRound>, WorkflowError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        let round = Self::require_round(&mut tx, round_id).await?;
        let assignments = RoundStore::assignments_tx(&mut tx, round_id).await?;
        check(self.gate.can_respond(approver_id, &round, &assignments))?;

        let now = Utc::now();
        let response = ApproverResponse {
            round_id: round_id.clone(),
            approver_id: approver_id.clone(),
            decision,
            comment,
            responded_at: now,
        };
        RoundStore::upsert_response(&mut tx, &response).await?;

        let responses = RoundStore::responses_tx(&mut tx, round_id).await?;
        let status = aggregate(&assignments, &responses);
        let applied =
            RoundStore::update_status(&mut tx, round_id, round.version, status, now).await?;
        if !applied {
            return Ok(None);
        }
        tx.commit().await.map_err(StoreError::from)?;

        Ok(Some(ApprovalRound { status, version: round.version + 1, updated_at: now, ..round }))
    }

    pub async fn comment(
        &self,
        round_id: &RoundId,
        author_id: &UserId,
        body: &str,
    ) -> Result<Comment, WorkflowError> {
        if body.trim().is_empty() {
            return Err(WorkflowError::precondition_failed("comment body must not be empty"));
        }

        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        let round = Self::require_round(&mut tx, round_id).await?;
        let assignments = RoundStore::assignments_tx(&mut tx, round_id).await?;
        check(self.gate.can_comment(author_id, &round, &assignments))?;

        let comment = Comment {
            id: CommentId(Uuid::new_v4().to_string()),
            round_id: round_id.clone(),
            author_id: author_id.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        RoundStore::insert_comment(&mut tx, &comment).await?;
        tx.commit().await.map_err(StoreError::from)?;

        tracing::info!(
            event_name = "approval.round.commented",
            round_id = %round.id.0,
            author_id = %author_id.0,
            "comment appended to round"
        );
        self.emit(RoundEventKind::RoundUpdated, &round);

        Ok(comment)
    }

    /// Opens round N+1 after a Declined or RevisionRequested round. Prior
    /// rounds are never touched; Approved is final for the entity.
    pub async fn reopen(&self, request: CreateRound) -> Result<ApprovalRound, WorkflowError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        let latest = RoundStore::latest_round_tx(&mut tx, &request.entity)
            .await?
            .ok_or_else(|| {
                WorkflowError::not_found(format!(
                    "no round exists for {} `{}`",
                    request.entity.entity_type, request.entity.entity_id
                ))
            })?;

        if latest.status.is_open() {
            return Err(WorkflowError::invalid_state(format!(
                "round `{}` is still open",
                latest.id.0
            )));
        }

        if !latest.status.is_reopenable() {
            return Err(WorkflowError::invalid_state(
                "approved rounds are final and cannot be reopened",
            ));
        }

        if !latest.is_owner(&request.owner_id) {
            return Err(WorkflowError::Authorization {
                reason: format!(
                    "user `{}` does not own the latest round for this entity",
                    request.owner_id.0
                ),
            });
        }

        let round = self.insert_new_round(&mut tx, &request, latest.round_number + 1).await?;
        tx.commit().await.map_err(StoreError::from)?;

        tracing::info!(
            event_name = "approval.round.reopened",
            round_id = %round.id.0,
            entity_type = %round.entity.entity_type,
            entity_id = %round.entity.entity_id,
            round_number = round.round_number,
            "new approval round opened after rejection"
        );
        self.emit(RoundEventKind::RoundCreated, &round);

        Ok(round)
    }

    pub async fn get_details(
        &self,
        round_id: &RoundId,
        caller_id: &UserId,
    ) -> Result<RoundDetails, WorkflowError> {
        let round = self
            .store
            .find_round(round_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("round `{}` not found", round_id.0)))?;
        let assignments = self.store.assignments(round_id).await?;
        check(self.gate.can_view(caller_id, &round, &assignments))?;

        let responses = self.store.responses(round_id).await?;
        let comments = self.store.comments(round_id).await?;

        Ok(RoundDetails { round, assignments, responses, comments })
    }

    async fn insert_new_round(
        &self,
        tx: &mut sqlx::SqliteConnection,
        request: &CreateRound,
        round_number: u32,
    ) -> Result<ApprovalRound, WorkflowError> {
        let now = Utc::now();
        let round = ApprovalRound {
            id: RoundId(Uuid::new_v4().to_string()),
            entity: request.entity.clone(),
            container_id: request.container_id.clone(),
            round_number,
            status: RoundStatus::Draft,
            owner_id: request.owner_id.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        RoundStore::insert_round(tx, &round).await.map_err(|error| {
            if error.is_unique_violation() {
                // Lost a race against a concurrent create/reopen; the
                // partial unique index on open rounds caught it.
                WorkflowError::invalid_state("entity already has an open round")
            } else {
                WorkflowError::Storage(error)
            }
        })?;

        let mut approver_ids = request.approver_ids.clone();
        approver_ids.sort_by(|left, right| left.0.cmp(&right.0));
        approver_ids.dedup();
        RoundStore::insert_assignments(tx, &round.id, &approver_ids).await?;

        Ok(round)
    }

    async fn require_round(
        tx: &mut sqlx::SqliteConnection,
        round_id: &RoundId,
    ) -> Result<ApprovalRound, WorkflowError> {
        RoundStore::round_tx(tx, round_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("round `{}` not found", round_id.0)))
    }

    fn emit(&self, kind: RoundEventKind, round: &ApprovalRound) {
        self.events.notify(RoundEvent::new(kind, round.entity.clone(), round.id.clone()));
    }
}

fn check(decision: AccessDecision) -> Result<(), WorkflowError> {
    match decision.denial {
        None => Ok(()),
        Some(denial) => Err(WorkflowError::from_denial(denial)),
    }
}

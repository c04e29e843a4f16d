use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use thiserror::Error;

use signoff_core::domain::round::{
    ApprovalRound, ApproverAssignment, ApproverResponse, Comment, CommentId, ContainerId,
    Decision, EntityRef, RoundId, RoundStatus, UserId,
};

use crate::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// True when the failure is a uniqueness violation, e.g. a second open
    /// round racing past the pre-check into the partial unique index.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Database(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    }

    /// True when SQLite reports the database busy or locked: another
    /// writer holds the write lock, or this transaction's read snapshot
    /// went stale before its first write (`SQLITE_BUSY_SNAPSHOT`, which
    /// the busy timeout does not cover). Transient; callers may retry on
    /// a fresh transaction.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                // 5 = SQLITE_BUSY, 517 = SQLITE_BUSY_SNAPSHOT,
                // 6 = SQLITE_LOCKED, 262 = SQLITE_LOCKED_SHAREDCACHE
                matches!(db.code().as_deref(), Some("5" | "517" | "6" | "262"))
            }
            _ => false,
        }
    }
}

pub fn round_status_as_str(status: RoundStatus) -> &'static str {
    match status {
        RoundStatus::Draft => "draft",
        RoundStatus::Submitted => "submitted",
        RoundStatus::Approved => "approved",
        RoundStatus::Declined => "declined",
        RoundStatus::RevisionRequested => "revision_requested",
    }
}

fn parse_round_status(raw: &str) -> Result<RoundStatus, StoreError> {
    match raw {
        "draft" => Ok(RoundStatus::Draft),
        "submitted" => Ok(RoundStatus::Submitted),
        "approved" => Ok(RoundStatus::Approved),
        "declined" => Ok(RoundStatus::Declined),
        "revision_requested" => Ok(RoundStatus::RevisionRequested),
        other => Err(StoreError::Decode(format!("unknown round status `{other}`"))),
    }
}

pub fn decision_as_str(decision: Decision) -> &'static str {
    match decision {
        Decision::Approved => "approved",
        Decision::Declined => "declined",
        Decision::RevisionRequested => "revision_requested",
    }
}

fn parse_decision(raw: &str) -> Result<Decision, StoreError> {
    match raw {
        "approved" => Ok(Decision::Approved),
        "declined" => Ok(Decision::Declined),
        "revision_requested" => Ok(Decision::RevisionRequested),
        other => Err(StoreError::Decode(format!("unknown decision `{other}`"))),
    }
}

fn get_column<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| StoreError::Decode(e.to_string()))
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}

fn row_to_round(row: &SqliteRow) -> Result<ApprovalRound, StoreError> {
    let round_number: i64 = get_column(row, "round_number")?;
    let round_number = u32::try_from(round_number)
        .map_err(|_| StoreError::Decode(format!("round_number out of range: {round_number}")))?;
    let status: String = get_column(row, "status")?;
    let created_at: String = get_column(row, "created_at")?;
    let updated_at: String = get_column(row, "updated_at")?;

    Ok(ApprovalRound {
        id: RoundId(get_column(row, "id")?),
        entity: EntityRef {
            entity_type: get_column(row, "entity_type")?,
            entity_id: get_column(row, "entity_id")?,
        },
        container_id: ContainerId(get_column(row, "container_id")?),
        round_number,
        status: parse_round_status(&status)?,
        owner_id: UserId(get_column(row, "owner_id")?),
        version: get_column(row, "version")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_response(row: &SqliteRow) -> Result<ApproverResponse, StoreError> {
    let status: String = get_column(row, "status")?;
    let responded_at: String = get_column(row, "responded_at")?;

    Ok(ApproverResponse {
        round_id: RoundId(get_column(row, "round_id")?),
        approver_id: UserId(get_column(row, "approver_id")?),
        decision: parse_decision(&status)?,
        comment: get_column(row, "comment")?,
        responded_at: parse_timestamp("responded_at", &responded_at)?,
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment, StoreError> {
    let created_at: String = get_column(row, "created_at")?;

    Ok(Comment {
        id: CommentId(get_column(row, "id")?),
        round_id: RoundId(get_column(row, "round_id")?),
        author_id: UserId(get_column(row, "author_id")?),
        body: get_column(row, "body")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

const ROUND_COLUMNS: &str = "id, entity_type, entity_id, container_id, round_number, status, \
                             owner_id, version, created_at, updated_at";

/// Persistence for rounds, assignments, responses and comments. Reads off
/// the pool serve query paths; the `*_tx` associated functions take a live
/// connection so the controller can compose them inside one transaction.
pub struct RoundStore {
    pool: DbPool,
}

impl RoundStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn find_round(&self, id: &RoundId) -> Result<Option<ApprovalRound>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::round_tx(&mut conn, id).await
    }

    pub async fn assignments(&self, id: &RoundId) -> Result<Vec<ApproverAssignment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::assignments_tx(&mut conn, id).await
    }

    pub async fn responses(&self, id: &RoundId) -> Result<Vec<ApproverResponse>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::responses_tx(&mut conn, id).await
    }

    pub async fn comments(&self, id: &RoundId) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, round_id, author_id, body, created_at
             FROM approval_comments WHERE round_id = ? ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_comment).collect()
    }

    pub async fn round_tx(
        conn: &mut SqliteConnection,
        id: &RoundId,
    ) -> Result<Option<ApprovalRound>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {ROUND_COLUMNS} FROM approval_rounds WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(conn)
                .await?;

        row.as_ref().map(row_to_round).transpose()
    }

    pub async fn open_round_tx(
        conn: &mut SqliteConnection,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRound>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM approval_rounds
             WHERE entity_type = ? AND entity_id = ? AND status IN ('draft', 'submitted')",
        ))
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(row_to_round).transpose()
    }

    pub async fn latest_round_tx(
        conn: &mut SqliteConnection,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRound>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ROUND_COLUMNS} FROM approval_rounds
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY round_number DESC LIMIT 1",
        ))
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(row_to_round).transpose()
    }

    pub async fn assignments_tx(
        conn: &mut SqliteConnection,
        id: &RoundId,
    ) -> Result<Vec<ApproverAssignment>, StoreError> {
        let rows = sqlx::query(
            "SELECT round_id, user_id FROM approver_assignments
             WHERE round_id = ? ORDER BY user_id ASC",
        )
        .bind(&id.0)
        .fetch_all(conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ApproverAssignment {
                    round_id: RoundId(get_column(row, "round_id")?),
                    user_id: UserId(get_column(row, "user_id")?),
                })
            })
            .collect()
    }

    pub async fn responses_tx(
        conn: &mut SqliteConnection,
        id: &RoundId,
    ) -> Result<Vec<ApproverResponse>, StoreError> {
        let rows = sqlx::query(
            "SELECT round_id, approver_id, status, comment, responded_at
             FROM approver_responses WHERE round_id = ? ORDER BY approver_id ASC",
        )
        .bind(&id.0)
        .fetch_all(conn)
        .await?;

        rows.iter().map(row_to_response).collect()
    }

    pub async fn insert_round(
        conn: &mut SqliteConnection,
        round: &ApprovalRound,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_rounds
                 (id, entity_type, entity_id, container_id, round_number, status,
                  owner_id, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&round.id.0)
        .bind(&round.entity.entity_type)
        .bind(&round.entity.entity_id)
        .bind(&round.container_id.0)
        .bind(i64::from(round.round_number))
        .bind(round_status_as_str(round.status))
        .bind(&round.owner_id.0)
        .bind(round.version)
        .bind(round.created_at.to_rfc3339())
        .bind(round.updated_at.to_rfc3339())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_assignments(
        conn: &mut SqliteConnection,
        round_id: &RoundId,
        approver_ids: &[UserId],
    ) -> Result<(), StoreError> {
        for approver_id in approver_ids {
            sqlx::query("INSERT INTO approver_assignments (round_id, user_id) VALUES (?, ?)")
                .bind(&round_id.0)
                .bind(&approver_id.0)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// A second response from the same approver replaces their prior row;
    /// it never creates a duplicate and never touches another approver's
    /// row.
    pub async fn upsert_response(
        conn: &mut SqliteConnection,
        response: &ApproverResponse,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approver_responses (round_id, approver_id, status, comment, responded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(round_id, approver_id) DO UPDATE SET
                 status = excluded.status,
                 comment = excluded.comment,
                 responded_at = excluded.responded_at",
        )
        .bind(&response.round_id.0)
        .bind(&response.approver_id.0)
        .bind(decision_as_str(response.decision))
        .bind(&response.comment)
        .bind(response.responded_at.to_rfc3339())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_comment(
        conn: &mut SqliteConnection,
        comment: &Comment,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_comments (id, round_id, author_id, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&comment.id.0)
        .bind(&comment.round_id.0)
        .bind(&comment.author_id.0)
        .bind(&comment.body)
        .bind(comment.created_at.to_rfc3339())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Versioned status write. Returns false when the expected version no
    /// longer matches, i.e. another transaction recomputed the status in
    /// between; the caller decides whether to retry.
    pub async fn update_status(
        conn: &mut SqliteConnection,
        round_id: &RoundId,
        expected_version: i64,
        status: RoundStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_rounds
             SET status = ?, version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(round_status_as_str(status))
        .bind(updated_at.to_rfc3339())
        .bind(&round_id.0)
        .bind(expected_version)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

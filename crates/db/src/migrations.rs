use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "approval_rounds",
        "approver_assignments",
        "approver_responses",
        "approval_comments",
        "idx_approval_rounds_open_entity",
        "idx_approval_rounds_entity",
        "idx_approval_rounds_status",
        "idx_approver_assignments_user_id",
        "idx_approval_comments_round_id",
    ];

    #[tokio::test]
    async fn migrations_create_workflow_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in ["approval_rounds", "approver_assignments", "approver_responses", "approval_comments"]
        {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn open_round_index_rejects_second_open_round_per_entity() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO approval_rounds \
             (id, entity_type, entity_id, container_id, round_number, status, owner_id, version, created_at, updated_at) \
             VALUES (?, 'site_diary', 'D-1', 'P-1', ?, ?, 'u-owner', 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";

        sqlx::query(insert)
            .bind("R-1")
            .bind(1)
            .bind("draft")
            .execute(&pool)
            .await
            .expect("first open round");

        let conflict = sqlx::query(insert)
            .bind("R-2")
            .bind(2)
            .bind("submitted")
            .execute(&pool)
            .await;
        assert!(conflict.is_err(), "second open round for the same entity must violate the index");

        // A terminal round does not occupy the open slot.
        sqlx::query("UPDATE approval_rounds SET status = 'declined' WHERE id = 'R-1'")
            .execute(&pool)
            .await
            .expect("close round");
        sqlx::query(insert)
            .bind("R-2")
            .bind(2)
            .bind("draft")
            .execute(&pool)
            .await
            .expect("new open round after terminal");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'approval_rounds'",
        )
        .fetch_one(&pool)
        .await
        .expect("check approval_rounds removed")
        .get::<i64, _>("count");

        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}

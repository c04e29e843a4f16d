use signoff_core::config::{AppConfig, ConfigError, LoadOptions};
use signoff_core::events::TracingEventSink;
use signoff_core::gate::{AuthorizationGate, InMemoryMembershipDirectory};
use signoff_db::store::RoundStore;
use signoff_db::{connect_with_settings, migrations, DbPool};
use signoff_engine::WorkflowController;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub controller: WorkflowController<InMemoryMembershipDirectory, TracingEventSink>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    // The membership directory is an external collaborator; until one is
    // wired in, an empty in-memory directory denies container access and
    // only owners and approvers can interact with their rounds.
    let controller = WorkflowController::new(
        RoundStore::new(db_pool.clone()),
        AuthorizationGate::new(InMemoryMembershipDirectory::default()),
        TracingEventSink,
    )
    .with_respond_retry_attempts(config.workflow.respond_retry_attempts);

    Ok(Application { config, db_pool, controller })
}

#[cfg(test)]
mod tests {
    use signoff_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_connects_and_migrates_an_in_memory_database() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed");

        let round_table: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'approval_rounds'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema check");
        assert_eq!(round_table, 1);
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_configuration() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/signoff".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
    }
}

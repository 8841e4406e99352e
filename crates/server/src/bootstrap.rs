use std::sync::Arc;

use signoff_core::approvals::{ApprovalService, DocumentHandlerRegistry};
use signoff_core::audit::TracingAuditSink;
use signoff_core::config::{AppConfig, ConfigError};
use signoff_core::domain::document::BizType;
use signoff_core::flows::FlowLoader;
use signoff_db::{
    connect_with_settings, migrations, DbPool, SqlDocumentStatusLedger, SqlFlowStore,
    SqlInstanceRepository, SqlUserDirectory,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ApprovalService>,
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

    let service = build_service(&config, &db_pool);
    Ok(Application { config, db_pool, service: Arc::new(service) })
}

/// Every configured document type gets the SQL status ledger as its handler.
fn build_service(config: &AppConfig, db_pool: &DbPool) -> ApprovalService {
    let mut handlers = DocumentHandlerRegistry::new();
    for document_type in &config.approvals.document_types {
        let biz_type = BizType::new(document_type.as_str());
        handlers.register(
            biz_type.clone(),
            Arc::new(SqlDocumentStatusLedger::new(db_pool.clone(), biz_type)),
        );
    }

    ApprovalService::new(
        Arc::new(SqlFlowStore::new(db_pool.clone())),
        Arc::new(SqlInstanceRepository::new(db_pool.clone())),
        Arc::new(SqlUserDirectory::new(db_pool.clone())),
        handlers,
        Arc::new(TracingAuditSink),
    )
    .with_loader(FlowLoader::new(config.approvals.manager_role_codes.iter().cloned()))
}

#[cfg(test)]
mod tests {
    use signoff_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use signoff_core::domain::document::BizType;

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        let config = AppConfig::load(options)?;
        bootstrap_with_config(config).await
    }

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_registers_configured_document_types() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_flow', 'approval_instance', 'approval_record')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("approval tables after bootstrap");
        assert_eq!(table_count, 3);

        let handlers = app.service.handlers();
        for biz_type in ["quotation", "contract", "test_report", "client_report"] {
            assert!(handlers.supports(&BizType::new(biz_type)), "{biz_type} handler missing");
        }
        assert!(app.service.loader().manager_role_codes().contains("dept_manager"));

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_url() {
        let result = bootstrap(overrides("postgres://localhost/signoff")).await;
        let message = result.err().expect("config error").to_string();
        assert!(message.contains("database.url"), "unexpected error: {message}");
    }
}

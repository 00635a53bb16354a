//! Composition root: configuration, logging, storage and the orchestrator.
//!
//! The engine does not ship a language-model client. Hosts pass a builder
//! that turns the `llm` config section into one; the result is wrapped in a
//! [`RetryingChatClient`] carrying the configured timeout and retry budget.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use agentflow_core::config::{AppConfig, ConfigError, LlmConfig, LoadOptions};
use agentflow_core::telemetry::init_logging;
use agentflow_db::{connect, migrations, DbPool, SqlMessageRepository, SqlTaskRepository};

use crate::llm::{ChatClient, RetryingChatClient};
use crate::tools::ToolRegistry;
use crate::transport::ChannelTransport;
use crate::workflow::{EngineDependencies, WorkflowOrchestrator};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub transport: Arc<ChannelTransport>,
    pub orchestrator: WorkflowOrchestrator,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("chat client could not be built: {0:#}")]
    ChatClient(#[source] anyhow::Error),
}

pub async fn bootstrap<F>(
    options: LoadOptions,
    build_chat: F,
    tools: ToolRegistry,
) -> Result<Application, BootstrapError>
where
    F: FnOnce(&LlmConfig) -> anyhow::Result<Arc<dyn ChatClient>>,
{
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, build_chat, tools).await
}

/// Like [`bootstrap`] for a config the host already loaded. Installs the
/// global log subscriber unless one is already set.
pub async fn bootstrap_with_config<F>(
    config: AppConfig,
    build_chat: F,
    tools: ToolRegistry,
) -> Result<Application, BootstrapError>
where
    F: FnOnce(&LlmConfig) -> anyhow::Result<Arc<dyn ChatClient>>,
{
    if let Err(error) = init_logging(&config.logging) {
        tracing::debug!(
            event_name = "system.bootstrap.logging_skipped",
            error = %error,
            "log subscriber already installed"
        );
    }
    info!(
        event_name = "system.bootstrap.start",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let inner = build_chat(&config.llm).map_err(BootstrapError::ChatClient)?;
    let chat: Arc<dyn ChatClient> = Arc::new(RetryingChatClient::from_config(inner, &config.llm));
    let transport = Arc::new(ChannelTransport::new());

    let orchestrator = WorkflowOrchestrator::new(
        EngineDependencies {
            chat,
            tools: Arc::new(tools),
            transport: transport.clone(),
            tasks: Arc::new(SqlTaskRepository::new(db_pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(db_pool.clone())),
        },
        &config,
    );

    Ok(Application { config, db_pool, transport, orchestrator })
}

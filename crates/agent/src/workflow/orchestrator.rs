use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use agentflow_core::config::{AppConfig, LlmProvider};
use agentflow_core::domain::message::{MessageKind, MessageRole};
use agentflow_core::domain::session::{AgentProfile, SessionId, TurnId};
use agentflow_core::flows::WorkflowStatus;
use agentflow_db::repositories::{MessageRepository, TaskRepository};

use crate::llm::ChatClient;
use crate::overflow::create_strategy;
use crate::tools::ToolRegistry;
use crate::transport::{ConnectionHandle, Transport};
use crate::workflow::bus::EventBus;
use crate::workflow::clarification::{
    ClarificationError, ClarificationManager, ClarificationRegistry, ClarificationReply,
};
use crate::workflow::context::{TurnSeed, WorkflowContext};
use crate::workflow::emit::Emitter;
use crate::workflow::handlers::{
    AnalyzeHandler, CheckpointHandler, FailureHandler, SummarizeHandler, TaskExecuteHandler,
    TaskSplitHandler,
};
use crate::workflow::history::HistoryAssembler;
use crate::workflow::ledger::TaskLedger;
use crate::workflow::WorkflowError;

/// Collaborators the engine runs against.
pub struct EngineDependencies {
    pub chat: Arc<dyn ChatClient>,
    pub tools: Arc<ToolRegistry>,
    pub transport: Arc<dyn Transport>,
    pub tasks: Arc<dyn TaskRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

/// A user message arriving for a session.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub user_id: String,
    pub content: String,
    pub agent: AgentProfile,
    /// Connection to stream to; a new one is opened when `None`.
    pub connection: Option<ConnectionHandle>,
}

impl TurnRequest {
    pub fn new(
        session_id: SessionId,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            user_id: user_id.into(),
            content: content.into(),
            agent: AgentProfile::default(),
            connection: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentProfile) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionHandle) -> Self {
        self.connection = Some(connection);
        self
    }
}

/// What `submit` did with a message.
#[derive(Debug)]
pub enum TurnDispatch {
    /// A new turn is running; `completion` yields its final context.
    Started {
        turn_id: TurnId,
        connection: ConnectionHandle,
        completion: JoinHandle<WorkflowContext>,
    },
    /// The message answered a pending clarification of an earlier turn,
    /// which now streams to `connection`.
    Resumed { turn_id: TurnId, connection: ConnectionHandle },
}

impl TurnDispatch {
    pub fn turn_id(&self) -> &TurnId {
        match self {
            Self::Started { turn_id, .. } | Self::Resumed { turn_id, .. } => turn_id,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        match self {
            Self::Started { connection, .. } | Self::Resumed { connection, .. } => connection,
        }
    }
}

/// Owns the stage-handler map and the clarification registry. Independent
/// instances share nothing.
pub struct WorkflowOrchestrator {
    bus: Arc<EventBus>,
    registry: Arc<ClarificationRegistry>,
    history: Arc<HistoryAssembler>,
    ledger: Arc<TaskLedger>,
    transport: Arc<dyn Transport>,
    provider: LlmProvider,
    model: String,
    connection_timeout: Duration,
}

impl WorkflowOrchestrator {
    pub fn new(deps: EngineDependencies, config: &AppConfig) -> Self {
        let strategy = create_strategy(&config.token_overflow, Some(deps.chat.clone()));
        let history = Arc::new(HistoryAssembler::new(deps.messages, strategy));
        let ledger = Arc::new(TaskLedger::new(deps.tasks));
        let emitter = Emitter::new(deps.transport.clone());
        let registry = Arc::new(ClarificationRegistry::new());
        let clarification = Arc::new(ClarificationManager::new(
            registry.clone(),
            deps.chat.clone(),
            history.clone(),
            emitter.clone(),
            config.workflow.max_clarification_retries,
        ));

        let mut bus = EventBus::new(config.workflow.max_chain_depth);
        bus.register(Arc::new(AnalyzeHandler::new(clarification)));
        bus.register(Arc::new(TaskSplitHandler::new(
            deps.chat.clone(),
            history.clone(),
            ledger.clone(),
            config.workflow.max_sub_tasks,
        )));
        bus.register(Arc::new(CheckpointHandler::split_complete(emitter.clone())));
        bus.register(Arc::new(TaskExecuteHandler::new(
            deps.chat.clone(),
            deps.tools,
            ledger.clone(),
            emitter.clone(),
            config.workflow.progress_mode,
        )));
        bus.register(Arc::new(CheckpointHandler::execute_complete(emitter.clone())));
        bus.register(Arc::new(SummarizeHandler::new(
            deps.chat,
            history.clone(),
            ledger.clone(),
            emitter.clone(),
        )));
        bus.register(Arc::new(FailureHandler::new(ledger.clone(), emitter)));

        tracing::info!(
            event_name = "workflow.orchestrator.ready",
            provider = config.llm.provider.as_str(),
            model = %config.llm.model,
            overflow_strategy = history.strategy_name(),
            "workflow orchestrator initialised"
        );

        Self {
            bus: Arc::new(bus),
            registry,
            history,
            ledger,
            transport: deps.transport,
            provider: config.llm.provider,
            model: config.llm.model.clone(),
            connection_timeout: Duration::from_secs(config.workflow.connection_timeout_secs),
        }
    }

    /// Message intake. Answers a pending clarification for the session if
    /// there is one, otherwise starts a new turn. Never waits for the turn.
    pub async fn submit(&self, request: TurnRequest) -> Result<TurnDispatch, WorkflowError> {
        if !self.has_pending(&request.session_id) {
            return self.start_turn(request).await;
        }

        let connection = self.open_connection(request.connection.clone()).await?;
        let reply = ClarificationReply {
            content: request.content.clone(),
            connection: Some(connection.clone()),
        };
        match self.resume(&request.session_id, reply).await {
            Err(WorkflowError::Clarification(
                ClarificationError::NoPendingSlot(_) | ClarificationError::Abandoned(_),
            )) => {
                tracing::info!(
                    event_name = "workflow.turn.resume_missed",
                    session_id = %request.session_id,
                    "pending clarification went away; starting a new turn"
                );
                self.start_turn(request.with_connection(connection)).await
            }
            outcome => outcome,
        }
    }

    /// Records the message, opens the parent task and drives the new turn
    /// from `ANALYZE` on a spawned task.
    pub async fn start_turn(&self, request: TurnRequest) -> Result<TurnDispatch, WorkflowError> {
        let connection = self.open_connection(request.connection).await?;
        self.history
            .record(&request.session_id, MessageRole::User, MessageKind::Chat, &request.content)
            .await?;
        let parent_task = self
            .ledger
            .create_parent_task(&request.content, request.session_id.clone(), &request.user_id)
            .await?;

        let turn_id = TurnId::generate();
        let mut ctx = WorkflowContext::new(TurnSeed {
            turn_id: turn_id.clone(),
            session_id: request.session_id,
            user_id: request.user_id,
            user_input: request.content,
            agent: request.agent,
            provider: self.provider,
            model: self.model.clone(),
            connection: connection.clone(),
            parent_task,
        });
        tracing::info!(
            event_name = "workflow.turn.started",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            connection = %connection,
            "turn started"
        );

        let bus = self.bus.clone();
        let completion = tokio::spawn(async move {
            bus.transition_to(&mut ctx, WorkflowStatus::Analyze).await;
            tracing::info!(
                event_name = "workflow.turn.finished",
                turn_id = %ctx.turn_id,
                session_id = %ctx.session_id,
                status = %ctx.status(),
                "turn finished"
            );
            ctx
        });

        Ok(TurnDispatch::Started { turn_id, connection, completion })
    }

    /// Hands `reply` to the turn parked on `session_id`. The rest of the turn
    /// streams to `reply.connection`, or to a freshly opened connection when
    /// the reply carries none; the question's connection is already closed.
    pub async fn resume(
        &self,
        session_id: &SessionId,
        mut reply: ClarificationReply,
    ) -> Result<TurnDispatch, WorkflowError> {
        let opened = reply.connection.is_none();
        let connection = self.open_connection(reply.connection.take()).await?;
        reply.connection = Some(connection.clone());

        let turn_id = match self.registry.resolve(session_id, reply) {
            Ok(turn_id) => turn_id,
            Err(error) => {
                if opened {
                    if let Err(close_error) = self.transport.complete_connection(&connection).await
                    {
                        tracing::warn!(
                            event_name = "workflow.turn.connection_close_failed",
                            session_id = %session_id,
                            connection = %connection,
                            error = %close_error,
                            "could not close unused connection"
                        );
                    }
                }
                return Err(error.into());
            }
        };
        tracing::info!(
            event_name = "workflow.turn.resumed",
            turn_id = %turn_id,
            session_id = %session_id,
            connection = %connection,
            "clarification answered"
        );
        Ok(TurnDispatch::Resumed { turn_id, connection })
    }

    pub fn has_pending(&self, session_id: &SessionId) -> bool {
        self.registry.is_pending(session_id)
    }

    /// Drops every pending clarification; the parked turns end without
    /// proceeding. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let dropped = self.registry.clear_all();
        tracing::info!(
            event_name = "workflow.orchestrator.shutdown",
            dropped_clarifications = dropped,
            "workflow orchestrator shut down"
        );
        dropped
    }

    async fn open_connection(
        &self,
        connection: Option<ConnectionHandle>,
    ) -> Result<ConnectionHandle, WorkflowError> {
        match connection {
            Some(connection) => Ok(connection),
            None => Ok(self.transport.create_connection(self.connection_timeout).await?),
        }
    }
}

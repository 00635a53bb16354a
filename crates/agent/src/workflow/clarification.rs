use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;

use agentflow_core::domain::message::{MessageKind, MessageRole};
use agentflow_core::domain::session::{SessionId, TurnId};

use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::prompts::{self, Classification};
use crate::transport::{ConnectionHandle, StreamEvent};
use crate::workflow::context::WorkflowContext;
use crate::workflow::emit::Emitter;
use crate::workflow::history::HistoryAssembler;

/// The user's answer to a clarification question, delivered by the
/// message-intake path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClarificationReply {
    pub content: String,
    /// Connection of the new user message; later output goes there.
    pub connection: Option<ConnectionHandle>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClarificationError {
    #[error("session `{0}` already has a pending clarification")]
    AlreadyPending(SessionId),
    #[error("session `{0}` has no pending clarification")]
    NoPendingSlot(SessionId),
    #[error("turn waiting on session `{0}` is gone")]
    Abandoned(SessionId),
}

struct PendingSlot {
    turn_id: TurnId,
    sender: oneshot::Sender<ClarificationReply>,
}

/// Pending input slots keyed by session. At most one slot per session.
/// Slots are removed by whoever resolves them, or cleared by the turn that
/// gives up waiting.
#[derive(Default)]
pub struct ClarificationRegistry {
    slots: DashMap<SessionId, PendingSlot>,
}

impl ClarificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a turn. A slot whose turn has already gone away is replaced.
    pub fn register(
        &self,
        session_id: &SessionId,
        turn_id: &TurnId,
    ) -> Result<oneshot::Receiver<ClarificationReply>, ClarificationError> {
        let (sender, receiver) = oneshot::channel();
        let slot = PendingSlot { turn_id: turn_id.clone(), sender };

        match self.slots.entry(session_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().sender.is_closed() {
                    return Err(ClarificationError::AlreadyPending(session_id.clone()));
                }
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }

        Ok(receiver)
    }

    /// Hands `reply` to the parked turn and returns its id.
    pub fn resolve(
        &self,
        session_id: &SessionId,
        reply: ClarificationReply,
    ) -> Result<TurnId, ClarificationError> {
        let (_, slot) = self
            .slots
            .remove(session_id)
            .ok_or_else(|| ClarificationError::NoPendingSlot(session_id.clone()))?;

        slot.sender.send(reply).map_err(|_| ClarificationError::Abandoned(session_id.clone()))?;
        Ok(slot.turn_id)
    }

    pub fn is_pending(&self, session_id: &SessionId) -> bool {
        self.slots.get(session_id).map(|slot| !slot.sender.is_closed()).unwrap_or(false)
    }

    /// Drops the slot of `session_id`; its parked turn wakes up abandoned.
    pub fn clear(&self, session_id: &SessionId) -> bool {
        self.slots.remove(session_id).is_some()
    }

    pub fn clear_all(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Decides whether a turn carries enough information, running a bounded
/// question-and-answer dialog with the user when it does not.
pub struct ClarificationManager {
    registry: Arc<ClarificationRegistry>,
    chat: Arc<dyn ChatClient>,
    history: Arc<HistoryAssembler>,
    emitter: Emitter,
    max_retries: u32,
}

impl ClarificationManager {
    pub fn new(
        registry: Arc<ClarificationRegistry>,
        chat: Arc<dyn ChatClient>,
        history: Arc<HistoryAssembler>,
        emitter: Emitter,
        max_retries: u32,
    ) -> Self {
        Self { registry, chat, history, emitter, max_retries }
    }

    /// `true` when the turn may proceed. Attempts past `max_retries` proceed
    /// with what is known; an unreadable classification stops the turn.
    pub async fn check_info_complete(&self, ctx: &mut WorkflowContext, retry_count: u32) -> bool {
        let mut retry = retry_count;

        loop {
            if retry > self.max_retries {
                self.registry.clear(&ctx.session_id);
                tracing::info!(
                    event_name = "workflow.clarification.retries_exhausted",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    retry,
                    "proceeding without complete information"
                );
                self.emitter.send(ctx, StreamEvent::text(prompts::RETRY_EXHAUSTED_NOTICE)).await;
                return true;
            }

            let verdict = match self.classify(ctx).await {
                Ok(verdict) => verdict,
                Err(reason) => {
                    tracing::error!(
                        event_name = "workflow.clarification.classification_failed",
                        turn_id = %ctx.turn_id,
                        session_id = %ctx.session_id,
                        retry,
                        error = %reason,
                        "information check failed"
                    );
                    self.registry.clear(&ctx.session_id);
                    self.emitter
                        .fail(ctx, "Sorry, I could not understand the request. Please try again.")
                        .await;
                    return false;
                }
            };

            if verdict.is_info_complete {
                self.registry.clear(&ctx.session_id);
                tracing::info!(
                    event_name = "workflow.clarification.complete",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    retry,
                    "request carries enough information"
                );
                return true;
            }

            let question = match verdict.missing_info_prompt.trim() {
                "" => prompts::DEFAULT_CLARIFICATION_QUESTION.to_string(),
                question => question.to_string(),
            };
            let Some(reply) = self.ask(ctx, &question).await else {
                return false;
            };

            if let Some(connection) = reply.connection {
                ctx.replace_connection(connection);
            }
            if let Err(error) = self
                .history
                .record(&ctx.session_id, MessageRole::User, MessageKind::Chat, &reply.content)
                .await
            {
                tracing::warn!(
                    event_name = "workflow.clarification.persist_failed",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    error = %error,
                    "could not store clarification reply"
                );
            }
            ctx.user_input = reply.content;
            retry += 1;
        }
    }

    async fn classify(&self, ctx: &WorkflowContext) -> Result<Classification, String> {
        let mut messages = self
            .history
            .assemble(&ctx.session_id, ctx.agent.system_prompt.as_deref())
            .await
            .map_err(|error| error.to_string())?;
        messages.push(ChatMessage::user(prompts::CLASSIFICATION_INSTRUCTION));

        let response = self
            .chat
            .complete(ChatRequest::new(messages).with_model(ctx.model.clone()))
            .await
            .map_err(|error| error.to_string())?;

        prompts::parse_classification(&response.content).map_err(|error| {
            format!("unparseable classification `{}`: {error}", response.content.trim())
        })
    }

    /// Persists and sends the question, then parks until the user answers.
    /// `None` when the slot cannot be registered or the wait is abandoned.
    async fn ask(&self, ctx: &mut WorkflowContext, question: &str) -> Option<ClarificationReply> {
        if let Err(error) = self
            .history
            .record(&ctx.session_id, MessageRole::Assistant, MessageKind::Clarification, question)
            .await
        {
            tracing::warn!(
                event_name = "workflow.clarification.persist_failed",
                turn_id = %ctx.turn_id,
                session_id = %ctx.session_id,
                error = %error,
                "could not store clarification question"
            );
        }

        let receiver = match self.registry.register(&ctx.session_id, &ctx.turn_id) {
            Ok(receiver) => receiver,
            Err(error) => {
                tracing::error!(
                    event_name = "workflow.clarification.slot_rejected",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    error = %error,
                    "cannot park turn"
                );
                self.emitter.fail(ctx, &error.to_string()).await;
                return None;
            }
        };

        self.emitter.end(ctx, StreamEvent::text(question)).await;
        tracing::info!(
            event_name = "workflow.clarification.suspended",
            turn_id = %ctx.turn_id,
            session_id = %ctx.session_id,
            "waiting for the user's answer"
        );

        match receiver.await {
            Ok(reply) => {
                tracing::info!(
                    event_name = "workflow.clarification.resumed",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    "user answered clarification"
                );
                Some(reply)
            }
            Err(_) => {
                tracing::info!(
                    event_name = "workflow.clarification.abandoned",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    "pending clarification dropped before an answer"
                );
                None
            }
        }
    }
}

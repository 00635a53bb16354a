use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use agentflow_core::flows::{validate_transition, WorkflowEvent, WorkflowStatus};

use crate::workflow::context::WorkflowContext;
use crate::workflow::StageError;

/// One stage of the workflow, registered against the status it reacts to.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> WorkflowStatus;

    fn should_handle(&self, event: &WorkflowEvent) -> bool {
        event.to == self.stage()
    }

    async fn process_event(&self, ctx: &mut WorkflowContext) -> Result<(), StageError>;

    /// Status to move to once `process_event` returned; `None` ends the chain.
    fn transition_to(&self, ctx: &WorkflowContext) -> Option<WorkflowStatus>;
}

/// Drives a context through its stages. Chained transitions run in a loop
/// rather than recursively and stop after `max_chain_depth` hops.
pub struct EventBus {
    handlers: HashMap<WorkflowStatus, Arc<dyn StageHandler>>,
    max_chain_depth: usize,
}

impl EventBus {
    pub fn new(max_chain_depth: usize) -> Self {
        Self { handlers: HashMap::new(), max_chain_depth }
    }

    /// Later registrations for the same stage replace earlier ones.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        let stage = handler.stage();
        if self.handlers.insert(stage, handler).is_some() {
            tracing::warn!(
                event_name = "workflow.bus.handler_replaced",
                stage = %stage,
                "stage handler registered twice"
            );
        }
    }

    pub fn handler_for(&self, status: WorkflowStatus) -> Option<&Arc<dyn StageHandler>> {
        self.handlers.get(&status)
    }

    /// Moves `ctx` to `status` and keeps dispatching until a handler ends the
    /// chain. Handler errors are logged and end the chain; they never reach
    /// the caller.
    pub async fn transition_to(&self, ctx: &mut WorkflowContext, status: WorkflowStatus) {
        let mut next = Some(status);
        let mut depth = 0usize;

        while let Some(target) = next.take() {
            if depth >= self.max_chain_depth {
                tracing::error!(
                    event_name = "workflow.transition.depth_exceeded",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    status = %ctx.status(),
                    pending = %target,
                    max_chain_depth = self.max_chain_depth,
                    "transition chain too long; stopping"
                );
                return;
            }
            depth += 1;

            let from = ctx.status();
            if let Err(error) = validate_transition(from, target) {
                tracing::warn!(
                    event_name = "workflow.transition.unexpected",
                    turn_id = %ctx.turn_id,
                    session_id = %ctx.session_id,
                    from = %from,
                    to = %target,
                    error = %error,
                    "transition outside the stage table"
                );
            }

            ctx.apply_status(target);
            let event =
                WorkflowEvent::new(ctx.turn_id.clone(), ctx.session_id.clone(), from, target);
            tracing::info!(
                event_name = "workflow.transition.applied",
                turn_id = %ctx.turn_id,
                session_id = %ctx.session_id,
                from = %from,
                to = %target,
                depth,
                "workflow status changed"
            );

            let Some(handler) = self.handlers.get(&target) else {
                tracing::debug!(
                    event_name = "workflow.transition.unhandled",
                    turn_id = %ctx.turn_id,
                    status = %target,
                    "no handler registered for status"
                );
                return;
            };
            if !handler.should_handle(&event) {
                return;
            }

            match handler.process_event(ctx).await {
                Ok(()) => next = handler.transition_to(ctx),
                Err(error) => {
                    tracing::error!(
                        event_name = "workflow.handler.failed",
                        turn_id = %ctx.turn_id,
                        session_id = %ctx.session_id,
                        stage = %target,
                        error = %error,
                        "stage handler failed; chain stopped"
                    );
                    return;
                }
            }
        }
    }
}

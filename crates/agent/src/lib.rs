//! Agent task-workflow engine.
//!
//! A user turn is driven through a fixed sequence of stages:
//! `ANALYZE` (with an optional clarification dialog), `TASK_SPLIT`,
//! `TASK_EXECUTE` and `SUMMARIZE`. Each stage is a [`workflow::StageHandler`]
//! keyed on the [`agentflow_core::WorkflowStatus`] it reacts to.
//!
//! # Key Types
//!
//! - `WorkflowOrchestrator` - owns the handler map and the clarification registry
//! - `ChatClient` - pluggable chat/tool-completion collaborator
//! - `Transport` - sink for streamed events
//! - `TokenOverflowStrategy` - trims history before a model call
//! - `bootstrap` - wires config, logging, SQLite storage and the orchestrator

pub mod bootstrap;
pub mod llm;
pub mod overflow;
pub mod prompts;
pub mod tools;
pub mod transport;
pub mod workflow;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use llm::{
    ChatChunk, ChatClient, ChatMessage, ChatRequest, ChatResponse, ChatRole, RetryingChatClient,
    TokenUsage,
};
pub use overflow::{create_strategy, TokenMessage, TokenOverflowStrategy, TokenProcessResult};
pub use tools::{Tool, ToolCall, ToolDefinition, ToolRegistry};
pub use transport::{
    ChannelTransport, ConnectionHandle, MessageType, StreamEvent, Transport, TransportError,
};
pub use workflow::{
    ClarificationError, ClarificationReply, EngineDependencies, TurnDispatch, TurnRequest,
    WorkflowContext, WorkflowError, WorkflowOrchestrator,
};

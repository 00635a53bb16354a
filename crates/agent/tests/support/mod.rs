#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use agentflow_agent::llm::ChatStream;
use agentflow_agent::{
    ChannelTransport, ChatChunk, ChatClient, ChatRequest, ChatResponse, EngineDependencies,
    StreamEvent, Tool, ToolCall, ToolRegistry, Transport, TurnRequest, WorkflowOrchestrator,
};
use agentflow_core::{AppConfig, SessionId};
use agentflow_db::repositories::{InMemoryMessageRepository, InMemoryTaskRepository};

enum Step {
    Reply(ChatResponse),
    Fail(String),
}

/// Chat client answering from a fixed script, one entry per model call in
/// call order. `complete` and `stream` share the script; streamed replies
/// arrive word by word.
#[derive(Default)]
pub struct ScriptedChat {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, content: &str) -> &Self {
        self.push(Step::Reply(ChatResponse::text(content)))
    }

    pub fn complete_info(&self) -> &Self {
        self.reply(r#"{"isInfoComplete": true, "missingInfoPrompt": ""}"#)
    }

    pub fn ask(&self, question: &str) -> &Self {
        let reply = serde_json::json!({ "isInfoComplete": false, "missingInfoPrompt": question });
        self.reply(&reply.to_string())
    }

    pub fn call_tools(&self, names: &[&str]) -> &Self {
        let tool_calls = names
            .iter()
            .enumerate()
            .map(|(index, name)| ToolCall {
                id: format!("call-{index}"),
                name: name.to_string(),
                arguments: Value::Null,
            })
            .collect();
        self.push(Step::Reply(ChatResponse { tool_calls, ..ChatResponse::default() }))
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.push(Step::Fail(message.to_string()))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }

    fn push(&self, step: Step) -> &Self {
        self.script.lock().expect("script lock").push_back(step);
        self
    }

    fn next(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().expect("requests lock").push(request);
        match self.script.lock().expect("script lock").pop_front() {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("chat script exhausted")),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.next(request)
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.next(request)?;
        let mut chunks: Vec<Result<ChatChunk>> = response
            .content
            .split_inclusive(' ')
            .map(|word| Ok(ChatChunk::Text(word.to_string())))
            .collect();
        chunks.push(Ok(ChatChunk::Finished(response)));
        Ok(stream::iter(chunks).boxed())
    }
}

/// Tool answering every call with a fixed value.
pub struct StaticTool {
    pub name: &'static str,
    pub output: Value,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        Ok(self.output.clone())
    }
}

pub struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub chat: Arc<ScriptedChat>,
    pub transport: Arc<ChannelTransport>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
}

pub fn harness() -> Harness {
    harness_with(AppConfig::default(), ToolRegistry::default())
}

pub fn harness_with(config: AppConfig, tools: ToolRegistry) -> Harness {
    let chat = ScriptedChat::new();
    let transport = Arc::new(ChannelTransport::new());
    let tasks = Arc::new(InMemoryTaskRepository::default());
    let messages = Arc::new(InMemoryMessageRepository::default());

    let orchestrator = WorkflowOrchestrator::new(
        EngineDependencies {
            chat: chat.clone(),
            tools: Arc::new(tools),
            transport: transport.clone(),
            tasks: tasks.clone(),
            messages: messages.clone(),
        },
        &config,
    );

    Harness { orchestrator, chat, transport, tasks, messages }
}

pub fn session() -> SessionId {
    SessionId::new("session-1")
}

pub fn request(content: &str) -> TurnRequest {
    TurnRequest::new(session(), "user-1", content)
}

/// Reads a connection until the transport closes it.
pub async fn drain(
    transport: &ChannelTransport,
    connection: &agentflow_agent::ConnectionHandle,
) -> Vec<StreamEvent> {
    let mut receiver = transport.take_receiver(connection).expect("receiver not taken yet");
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

/// Opens a connection through the public transport API; handy when a test
/// wants to pick the connection a message streams to.
pub async fn open(transport: &ChannelTransport) -> agentflow_agent::ConnectionHandle {
    transport
        .create_connection(std::time::Duration::from_secs(60))
        .await
        .expect("connection")
}

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use agentflow_core::domain::task::TaskId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    TaskStarted,
    TaskStatusLoading,
    TaskStatusFinished,
    ToolCall,
    Error,
}

/// One event pushed to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub content: String,
    pub done: bool,
    pub thinking: bool,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            thinking: false,
            message_type,
            task_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MessageType::Text, content)
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self { thinking: true, ..Self::new(MessageType::Text, content) }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageType::Error, content)
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(pub String);

impl ConnectionHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection `{0}` is closed")]
    Closed(ConnectionHandle),
    #[error("connection `{0}` is unknown")]
    UnknownConnection(ConnectionHandle),
    #[error("transport send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_connection(&self, timeout: Duration) -> Result<ConnectionHandle, TransportError>;

    async fn send_message(
        &self,
        handle: &ConnectionHandle,
        event: StreamEvent,
    ) -> Result<(), TransportError>;

    /// Sends `event` marked done and closes the connection.
    async fn send_end_message(
        &self,
        handle: &ConnectionHandle,
        event: StreamEvent,
    ) -> Result<(), TransportError>;

    async fn complete_connection(&self, handle: &ConnectionHandle) -> Result<(), TransportError>;

    /// Reports `error` to the caller and closes the connection.
    async fn handle_error(&self, handle: &ConnectionHandle, error: &str)
        -> Result<(), TransportError>;
}

struct ChannelConnection {
    sender: Option<mpsc::UnboundedSender<StreamEvent>>,
    receiver: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    timeout: Duration,
    last_activity: Instant,
}

impl ChannelConnection {
    fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

/// In-process transport: every connection is an unbounded channel whose
/// receiving half the host takes with [`ChannelTransport::take_receiver`].
#[derive(Default)]
pub struct ChannelTransport {
    connections: DashMap<ConnectionHandle, ChannelConnection>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the receiving half once. Events sent before the call are buffered.
    pub fn take_receiver(
        &self,
        handle: &ConnectionHandle,
    ) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        let (receiver, closed) = {
            let mut connection = self.connections.get_mut(handle)?;
            (connection.receiver.take(), connection.is_closed())
        };
        if closed {
            self.connections.remove(handle);
        }
        receiver
    }

    pub fn is_open(&self, handle: &ConnectionHandle) -> bool {
        self.connections.get(handle).map(|connection| !connection.is_closed()).unwrap_or(false)
    }

    fn push(&self, handle: &ConnectionHandle, event: StreamEvent) -> Result<(), TransportError> {
        let mut connection = self
            .connections
            .get_mut(handle)
            .ok_or_else(|| TransportError::UnknownConnection(handle.clone()))?;

        let Some(sender) = connection.sender.as_ref() else {
            return Err(TransportError::Closed(handle.clone()));
        };

        if connection.last_activity.elapsed() > connection.timeout {
            tracing::warn!(
                event_name = "transport.connection.timed_out",
                connection = %handle,
                timeout_secs = connection.timeout.as_secs(),
                "connection idle past its timeout"
            );
            let _ = sender.send(StreamEvent::error("connection timed out").finished());
            connection.sender = None;
            return Err(TransportError::Closed(handle.clone()));
        }

        sender.send(event).map_err(|_| TransportError::Closed(handle.clone()))?;
        connection.last_activity = Instant::now();
        Ok(())
    }

    fn close(&self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        let receiver_taken = {
            let mut connection = self
                .connections
                .get_mut(handle)
                .ok_or_else(|| TransportError::UnknownConnection(handle.clone()))?;
            connection.sender = None;
            connection.receiver.is_none()
        };
        if receiver_taken {
            self.connections.remove(handle);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn create_connection(&self, timeout: Duration) -> Result<ConnectionHandle, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::generate();
        self.connections.insert(
            handle.clone(),
            ChannelConnection {
                sender: Some(sender),
                receiver: Some(receiver),
                timeout,
                last_activity: Instant::now(),
            },
        );
        Ok(handle)
    }

    async fn send_message(
        &self,
        handle: &ConnectionHandle,
        event: StreamEvent,
    ) -> Result<(), TransportError> {
        self.push(handle, event)
    }

    async fn send_end_message(
        &self,
        handle: &ConnectionHandle,
        event: StreamEvent,
    ) -> Result<(), TransportError> {
        self.push(handle, event.finished())?;
        self.close(handle)
    }

    async fn complete_connection(&self, handle: &ConnectionHandle) -> Result<(), TransportError> {
        self.close(handle)
    }

    async fn handle_error(
        &self,
        handle: &ConnectionHandle,
        error: &str,
    ) -> Result<(), TransportError> {
        let sent = self.push(handle, StreamEvent::error(error).finished());
        self.close(handle)?;
        sent
    }
}

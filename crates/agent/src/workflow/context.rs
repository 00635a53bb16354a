use std::collections::HashMap;

use serde_json::Value;

use agentflow_core::config::LlmProvider;
use agentflow_core::domain::session::{AgentProfile, SessionId, TurnId};
use agentflow_core::domain::task::TaskRecord;
use agentflow_core::flows::WorkflowStatus;

use crate::transport::ConnectionHandle;

const INFO_COMPLETE_KEY: &str = "info_complete";
const FAILURE_REASON_KEY: &str = "failure_reason";
const ERROR_REPORTED_KEY: &str = "error_reported";
const SUMMARY_ERROR_KEY: &str = "summary_error";

/// Everything a new turn starts from.
#[derive(Clone, Debug)]
pub struct TurnSeed {
    pub turn_id: TurnId,
    pub session_id: SessionId,
    pub user_id: String,
    pub user_input: String,
    pub agent: AgentProfile,
    pub provider: LlmProvider,
    pub model: String,
    pub connection: ConnectionHandle,
    pub parent_task: TaskRecord,
}

/// Mutable state of one turn. Owned by the task driving the turn, so the
/// task cursor has a single writer.
#[derive(Clone, Debug)]
pub struct WorkflowContext {
    pub turn_id: TurnId,
    pub session_id: SessionId,
    pub user_id: String,
    pub agent: AgentProfile,
    pub provider: LlmProvider,
    pub model: String,
    /// Latest user message of the turn; replaced by clarification replies.
    pub user_input: String,
    status: WorkflowStatus,
    previous_status: Option<WorkflowStatus>,
    tasks: Vec<String>,
    current_task_index: usize,
    sub_tasks: Vec<(String, TaskRecord)>,
    sub_task_results: Vec<(String, String)>,
    complete_task_count: usize,
    parent_task: TaskRecord,
    extra_data: HashMap<String, Value>,
    connection: ConnectionHandle,
}

impl WorkflowContext {
    pub fn new(seed: TurnSeed) -> Self {
        Self {
            turn_id: seed.turn_id,
            session_id: seed.session_id,
            user_id: seed.user_id,
            agent: seed.agent,
            provider: seed.provider,
            model: seed.model,
            user_input: seed.user_input,
            status: WorkflowStatus::Initialized,
            previous_status: None,
            tasks: Vec::new(),
            current_task_index: 0,
            sub_tasks: Vec::new(),
            sub_task_results: Vec::new(),
            complete_task_count: 0,
            parent_task: seed.parent_task,
            extra_data: HashMap::new(),
            connection: seed.connection,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn previous_status(&self) -> Option<WorkflowStatus> {
        self.previous_status
    }

    /// Records the move; only the event bus calls this.
    pub(crate) fn apply_status(&mut self, status: WorkflowStatus) {
        self.previous_status = Some(self.status);
        self.status = status;
    }

    /// Registers a sub-task fixed at split time. Duplicate names are ignored.
    pub fn add_sub_task(&mut self, name: impl Into<String>, record: TaskRecord) -> bool {
        let name = name.into();
        if self.sub_tasks.iter().any(|(existing, _)| *existing == name) {
            return false;
        }
        self.tasks.push(name.clone());
        self.sub_tasks.push((name, record));
        true
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn has_next_task(&self) -> bool {
        self.current_task_index < self.tasks.len()
    }

    /// Returns the task under the cursor and advances it. `None` once every
    /// task has been handed out.
    pub fn next_task(&mut self) -> Option<String> {
        let task = self.tasks.get(self.current_task_index).cloned()?;
        self.current_task_index += 1;
        Some(task)
    }

    pub fn current_task_index(&self) -> usize {
        self.current_task_index
    }

    pub fn sub_task(&self, name: &str) -> Option<&TaskRecord> {
        self.sub_tasks.iter().find(|(existing, _)| existing == name).map(|(_, record)| record)
    }

    pub fn sub_task_mut(&mut self, name: &str) -> Option<&mut TaskRecord> {
        self.sub_tasks.iter_mut().find(|(existing, _)| existing == name).map(|(_, record)| record)
    }

    /// Sub-task records in split order.
    pub fn sub_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.sub_tasks.iter().map(|(_, record)| record)
    }

    /// Stores the result of `name` once. Later calls for the same task, or
    /// calls for unknown tasks, return `false` and change nothing.
    pub fn set_task_result(&mut self, name: &str, result: impl Into<String>) -> bool {
        let known = self.sub_tasks.iter().any(|(existing, _)| existing == name);
        let recorded = self.sub_task_results.iter().any(|(existing, _)| existing == name);
        if !known || recorded {
            return false;
        }
        self.sub_task_results.push((name.to_string(), result.into()));
        self.complete_task_count += 1;
        true
    }

    pub fn sub_task_results(&self) -> &[(String, String)] {
        &self.sub_task_results
    }

    pub fn complete_task_count(&self) -> usize {
        self.complete_task_count
    }

    pub fn parent_task(&self) -> &TaskRecord {
        &self.parent_task
    }

    pub fn parent_task_mut(&mut self) -> &mut TaskRecord {
        &mut self.parent_task
    }

    /// The original request, followed by the latest user input when a
    /// clarification replaced it.
    pub fn goal(&self) -> String {
        let request = self.parent_task.name.trim();
        let latest = self.user_input.trim();
        if latest.is_empty() || latest == request {
            request.to_string()
        } else {
            format!("{request}\n{latest}")
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Points further output at the connection of a newer user message.
    pub fn replace_connection(&mut self, connection: ConnectionHandle) {
        self.connection = connection;
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra_data.get(key)
    }

    pub fn insert_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra_data.insert(key.into(), value.into());
    }

    pub fn extra_data(&self) -> &HashMap<String, Value> {
        &self.extra_data
    }

    pub fn set_info_complete(&mut self, complete: bool) {
        self.insert_extra(INFO_COMPLETE_KEY, complete);
    }

    pub fn info_complete(&self) -> Option<bool> {
        self.extra(INFO_COMPLETE_KEY).and_then(Value::as_bool)
    }

    /// Marks the turn for the `FAILED` stage. The first reason wins.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        if self.failure_reason().is_none() {
            self.insert_extra(FAILURE_REASON_KEY, reason.into());
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.extra(FAILURE_REASON_KEY).and_then(Value::as_str)
    }

    pub fn mark_error_reported(&mut self) {
        self.insert_extra(ERROR_REPORTED_KEY, true);
    }

    pub fn error_reported(&self) -> bool {
        self.extra(ERROR_REPORTED_KEY).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_summary_error(&mut self, error: impl Into<String>) {
        self.insert_extra(SUMMARY_ERROR_KEY, error.into());
    }

    pub fn summary_error(&self) -> Option<&str> {
        self.extra(SUMMARY_ERROR_KEY).and_then(Value::as_str)
    }
}

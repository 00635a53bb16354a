mod support;

use std::io;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::task::JoinHandle;

use agentflow_agent::prompts::{CLASSIFICATION_INSTRUCTION, RETRY_EXHAUSTED_NOTICE};
use agentflow_agent::{
    ChatRole, ClarificationError, ClarificationReply, ConnectionHandle, MessageType,
    ToolRegistry, TurnDispatch, WorkflowContext, WorkflowError,
};
use agentflow_core::config::ProgressMode;
use agentflow_core::{AppConfig, MessageKind, TaskStatus, WorkflowStatus};
use agentflow_db::repositories::{MessageRepository, TaskRepository};

use support::{drain, harness, harness_with, open, request, session, StaticTool};

async fn finish(dispatch: TurnDispatch) -> WorkflowContext {
    match dispatch {
        TurnDispatch::Started { completion, .. } => completion.await.expect("turn task"),
        TurnDispatch::Resumed { .. } => panic!("expected a new turn"),
    }
}

fn started(dispatch: TurnDispatch) -> (ConnectionHandle, JoinHandle<WorkflowContext>) {
    match dispatch {
        TurnDispatch::Started { connection, completion, .. } => (connection, completion),
        TurnDispatch::Resumed { .. } => panic!("expected a new turn"),
    }
}

fn resumed(dispatch: TurnDispatch) -> ConnectionHandle {
    match dispatch {
        TurnDispatch::Resumed { connection, .. } => connection,
        TurnDispatch::Started { .. } => panic!("expected the pending turn to resume"),
    }
}

#[tokio::test]
async fn complete_request_goes_straight_to_split_without_clarifying() {
    let h = harness();
    h.chat
        .complete_info()
        .reply(r#"["find flights", "book hotel"]"#)
        .reply("LH 1172 on May 3")
        .reply("Hotel Avenida, two nights")
        .reply("Your trip is booked.");

    let dispatch =
        h.orchestrator.submit(request("Plan a trip to Lisbon May 3-5")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    assert_eq!(ctx.previous_status(), Some(WorkflowStatus::Summarize));
    assert_eq!(ctx.info_complete(), Some(true));
    assert!(!h.orchestrator.has_pending(&session()));

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 5);
    let classification = requests[0].messages.last().expect("classification prompt");
    assert_eq!(classification.content, CLASSIFICATION_INSTRUCTION);
    assert!(requests[1].messages.last().expect("split prompt").content.contains("Plan a trip"));

    let history = h.messages.list_for_session(&session()).await.expect("history");
    assert!(history.iter().all(|message| message.kind != MessageKind::Clarification));
    assert_eq!(history.last().expect("answer").kind, MessageKind::Summary);
    assert_eq!(history.last().expect("answer").content, "Your trip is booked.");

    let kinds: Vec<MessageType> = events.iter().map(|event| event.message_type).collect();
    assert_eq!(
        &kinds[..5],
        &[
            MessageType::TaskStatusLoading,
            MessageType::TaskStarted,
            MessageType::TaskStatusFinished,
            MessageType::TaskStarted,
            MessageType::TaskStatusFinished,
        ]
    );
    let streamed: String = events[5..]
        .iter()
        .filter(|event| event.message_type == MessageType::Text)
        .map(|event| event.content.as_str())
        .collect();
    assert_eq!(streamed, "Your trip is booked.");
    assert!(events.last().expect("end event").done);
    assert!(events[..events.len() - 1].iter().all(|event| !event.done));

    let parent = h.tasks.find_task(&ctx.parent_task().id).await.expect("find").expect("parent");
    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(parent.result.as_deref(), Some("Your trip is booked."));
}

#[tokio::test]
async fn clarification_resumes_on_the_answering_connection() {
    let h = harness();
    h.chat
        .ask("Which city?")
        .ask("Which dates?")
        .complete_info()
        .reply(r#"["book hotel"]"#)
        .reply("Hotel Avenida")
        .reply("Booked Hotel Avenida.");

    let (first, completion) =
        started(h.orchestrator.submit(request("Book me a hotel")).await.expect("submit"));
    let question = drain(&h.transport, &first).await;
    assert_eq!(question.len(), 1);
    assert_eq!(question[0].content, "Which city?");
    assert!(question[0].done);
    assert!(h.orchestrator.has_pending(&session()));

    let second = resumed(h.orchestrator.submit(request("Lisbon")).await.expect("reply 1"));
    let question = drain(&h.transport, &second).await;
    assert_eq!(question[0].content, "Which dates?");

    let reply_connection = open(&h.transport).await;
    let third = resumed(
        h.orchestrator
            .submit(request("May 3 to 5").with_connection(reply_connection.clone()))
            .await
            .expect("reply 2"),
    );
    assert_eq!(third, reply_connection);
    let events = drain(&h.transport, &third).await;
    let ctx = completion.await.expect("turn task");

    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    assert_eq!(ctx.user_input, "May 3 to 5");
    assert_eq!(ctx.goal(), "Book me a hotel\nMay 3 to 5");
    assert!(events.iter().all(|event| event.content != RETRY_EXHAUSTED_NOTICE));
    assert_eq!(h.chat.requests().len(), 6);
    assert_eq!(h.chat.remaining(), 0);

    let history = h.messages.list_for_session(&session()).await.expect("history");
    let clarifications: Vec<&str> = history
        .iter()
        .filter(|message| message.kind == MessageKind::Clarification)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(clarifications, vec!["Which city?", "Which dates?"]);
    let requests = h.chat.requests();
    assert!(requests[2]
        .messages
        .iter()
        .any(|message| message.role == ChatRole::User && message.content == "Lisbon"));
}

#[tokio::test]
async fn exhausted_clarification_proceeds_with_a_notice() {
    let h = harness();
    h.chat
        .ask("Which city?")
        .ask("Which dates?")
        .ask("What budget?")
        .reply(r#"["book hotel"]"#)
        .reply("Hotel Avenida")
        .reply("Booked.");

    let (first, completion) =
        started(h.orchestrator.submit(request("Book me a hotel")).await.expect("submit"));
    drain(&h.transport, &first).await;

    let second = resumed(h.orchestrator.submit(request("Lisbon")).await.expect("reply 1"));
    drain(&h.transport, &second).await;
    let third = resumed(h.orchestrator.submit(request("soon")).await.expect("reply 2"));
    let question = drain(&h.transport, &third).await;
    assert_eq!(question[0].content, "What budget?");

    let fourth = resumed(h.orchestrator.submit(request("whatever")).await.expect("reply 3"));
    let events = drain(&h.transport, &fourth).await;
    let ctx = completion.await.expect("turn task");

    assert_eq!(events[0].message_type, MessageType::Text);
    assert_eq!(events[0].content, RETRY_EXHAUSTED_NOTICE);
    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    assert_eq!(ctx.info_complete(), Some(true));

    // Three classifications, then split, execute and summarize; no fourth check.
    let requests = h.chat.requests();
    assert_eq!(requests.len(), 6);
    let classifications = requests
        .iter()
        .filter(|request| {
            request.messages.last().map(|message| message.content.as_str())
                == Some(CLASSIFICATION_INSTRUCTION)
        })
        .count();
    assert_eq!(classifications, 3);
    assert!(!h.orchestrator.has_pending(&session()));
}

#[tokio::test]
async fn failing_sub_task_is_recorded_and_execution_continues() {
    let h = harness();
    h.chat
        .complete_info()
        .reply(r#"["alpha", "beta", "gamma"]"#)
        .reply("alpha done")
        .fail("upstream timeout")
        .reply("gamma done")
        .reply("Two of three finished.");

    let dispatch = h.orchestrator.submit(request("do three things")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    assert_eq!(ctx.complete_task_count(), 3);
    assert!(!ctx.has_next_task());

    let sub_tasks = h.tasks.list_sub_tasks(&ctx.parent_task().id).await.expect("sub-tasks");
    let outcome: Vec<(&str, TaskStatus)> =
        sub_tasks.iter().map(|task| (task.name.as_str(), task.status)).collect();
    assert_eq!(
        outcome,
        vec![
            ("alpha", TaskStatus::Completed),
            ("beta", TaskStatus::Failed),
            ("gamma", TaskStatus::Completed),
        ]
    );
    let beta = &sub_tasks[1];
    let failure = beta.result.as_deref().expect("failure text");
    assert!(failure.starts_with("Task failed"));
    assert!(failure.contains("upstream timeout"));
    assert_eq!(beta.progress, 0);

    let inline_error = events
        .iter()
        .find(|event| event.message_type == MessageType::Error)
        .expect("inline error");
    assert_eq!(inline_error.task_id.as_ref(), Some(&beta.id));
    assert!(!inline_error.done);

    // gamma sees both earlier results, including the failure.
    let requests = h.chat.requests();
    let gamma_prompt = &requests[4].messages.last().expect("prompt").content;
    assert!(gamma_prompt.contains("- alpha: alpha done"));
    assert!(gamma_prompt.contains("- beta: Task failed"));

    // Truncating ratio: (3 / 3) * 100 once every sub-task reported.
    let parent = h.tasks.find_task(&ctx.parent_task().id).await.expect("find").expect("parent");
    assert_eq!(parent.progress, 100);
    assert_eq!(ProgressMode::TruncatedRatio.percent(2, 3), 0);
}

#[tokio::test]
async fn summary_failure_reports_error_without_failing_the_turn() {
    let mut config = AppConfig::default();
    config.workflow.progress_mode = ProgressMode::Percentage;
    let h = harness_with(config, ToolRegistry::default());
    h.chat
        .complete_info()
        .reply(r#"["alpha", "beta"]"#)
        .reply("alpha done")
        .reply("beta done")
        .fail("model overloaded");

    let dispatch = h.orchestrator.submit(request("two things")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Summarize);
    assert!(ctx.summary_error().expect("summary error").contains("model overloaded"));
    assert!(ctx.error_reported());

    let last = events.last().expect("error event");
    assert_eq!(last.message_type, MessageType::Error);
    assert!(last.done);

    let parent = h.tasks.find_task(&ctx.parent_task().id).await.expect("find").expect("parent");
    assert_eq!(parent.status, TaskStatus::Progressing);
    assert_eq!(parent.progress, 100);
}

#[tokio::test]
async fn unreadable_classification_fails_the_turn() {
    let h = harness();
    h.chat.reply("I think it is probably fine");

    let dispatch = h.orchestrator.submit(request("do something")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Failed);
    assert_eq!(ctx.previous_status(), Some(WorkflowStatus::Analyze));
    assert_eq!(ctx.info_complete(), Some(false));
    assert!(!h.orchestrator.has_pending(&session()));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message_type, MessageType::Error);
    assert!(events[0].done);

    let parent = h.tasks.find_task(&ctx.parent_task().id).await.expect("find").expect("parent");
    assert_eq!(parent.status, TaskStatus::Failed);
}

#[tokio::test]
async fn split_failure_routes_to_failed() {
    let h = harness();
    h.chat.complete_info().fail("rate limited");

    let dispatch = h.orchestrator.submit(request("do something")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Failed);
    assert_eq!(ctx.previous_status(), Some(WorkflowStatus::TaskSplit));
    assert!(ctx.failure_reason().expect("reason").contains("rate limited"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message_type, MessageType::Error);

    let parent = h.tasks.find_task(&ctx.parent_task().id).await.expect("find").expect("parent");
    assert_eq!(parent.status, TaskStatus::Failed);
    assert!(parent.result.expect("reason").contains("rate limited"));
}

#[tokio::test]
async fn empty_split_falls_back_to_the_request_itself() {
    let h = harness();
    h.chat.complete_info().reply("[]").reply("done").reply("All done.");

    let dispatch = h.orchestrator.submit(request("water the plants")).await.expect("submit");
    let connection = dispatch.connection().clone();
    drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.tasks(), ["water the plants".to_string()]);
    assert_eq!(ctx.status(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn tool_calls_are_summarized_and_answered() {
    let mut tools = ToolRegistry::default();
    tools.register(StaticTool { name: "weather", output: json!({ "lisbon": "sunny" }) });
    let h = harness_with(AppConfig::default(), tools);
    h.chat
        .complete_info()
        .reply(r#"["check weather"]"#)
        .call_tools(&["weather"])
        .reply("Sunny in Lisbon")
        .reply("It will be sunny.");

    let dispatch = h.orchestrator.submit(request("weather in Lisbon?")).await.expect("submit");
    let connection = dispatch.connection().clone();
    let events = drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    let tool_event = events
        .iter()
        .find(|event| event.message_type == MessageType::ToolCall)
        .expect("tool call event");
    assert_eq!(tool_event.content, "Called tools: weather");

    let requests = h.chat.requests();
    assert_eq!(requests[2].tools.len(), 1);
    let follow_up = &requests[3].messages;
    let tool_message = follow_up.last().expect("tool result");
    assert_eq!(tool_message.role, ChatRole::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-0"));
    assert!(tool_message.content.contains("sunny"));
    assert_eq!(ctx.sub_task_results()[0].1, "Sunny in Lisbon");
}

#[tokio::test]
async fn shutdown_releases_parked_turns() {
    let h = harness();
    h.chat.ask("Which city?");

    let (first, completion) =
        started(h.orchestrator.submit(request("Book me a hotel")).await.expect("submit"));
    drain(&h.transport, &first).await;
    assert!(h.orchestrator.has_pending(&session()));

    assert_eq!(h.orchestrator.shutdown(), 1);
    let ctx = completion.await.expect("turn task");

    assert_eq!(ctx.status(), WorkflowStatus::Failed);
    assert!(!h.orchestrator.has_pending(&session()));

    // The next message starts a fresh turn.
    h.chat.complete_info();
    let next = h.orchestrator.submit(request("Lisbon")).await.expect("submit");
    assert!(matches!(next, TurnDispatch::Started { .. }));
}

#[tokio::test]
async fn resume_without_connection_streams_to_a_new_one() {
    let h = harness();
    h.chat
        .ask("Which city?")
        .complete_info()
        .reply(r#"["book hotel"]"#)
        .reply("Hotel Avenida")
        .reply("Booked.");

    let (first, completion) =
        started(h.orchestrator.submit(request("Book me a hotel")).await.expect("submit"));
    drain(&h.transport, &first).await;

    let reply = ClarificationReply { content: "Lisbon".to_string(), connection: None };
    let connection = resumed(h.orchestrator.resume(&session(), reply).await.expect("resume"));
    assert_ne!(connection, first);
    let events = drain(&h.transport, &connection).await;
    let ctx = completion.await.expect("turn task");

    assert_eq!(ctx.status(), WorkflowStatus::Completed);
    assert!(events.iter().any(|event| event.message_type == MessageType::TaskStarted));
    let streamed: String = events
        .iter()
        .filter(|event| event.message_type == MessageType::Text)
        .map(|event| event.content.as_str())
        .collect();
    assert_eq!(streamed, "Booked.");
    assert!(events.last().expect("end event").done);
}

#[tokio::test]
async fn resume_without_pending_turn_is_rejected() {
    let h = harness();
    let reply = ClarificationReply { content: "Lisbon".to_string(), connection: None };

    let error = h.orchestrator.resume(&session(), reply).await.expect_err("nothing pending");

    assert!(matches!(
        error,
        WorkflowError::Clarification(ClarificationError::NoPendingSlot(_))
    ));
}

/// Collects formatted log output for the current thread.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer lock")).into_owned()
    }
}

#[tokio::test]
async fn duplicate_sub_tasks_are_dropped_with_a_warning() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    h.chat
        .complete_info()
        .reply(r#"["alpha", "alpha", "beta"]"#)
        .reply("alpha done")
        .reply("beta done")
        .reply("Both done.");

    let dispatch = h.orchestrator.submit(request("two things")).await.expect("submit");
    let connection = dispatch.connection().clone();
    drain(&h.transport, &connection).await;
    let ctx = finish(dispatch).await;

    assert_eq!(ctx.tasks(), ["alpha".to_string(), "beta".to_string()]);
    let sub_tasks = h.tasks.list_sub_tasks(&ctx.parent_task().id).await.expect("sub-tasks");
    assert_eq!(sub_tasks.len(), 2);

    let output = logs.contents();
    let warning = output
        .lines()
        .find(|line| line.contains("workflow.split.duplicate_dropped"))
        .expect("duplicate warning");
    assert!(warning.contains("WARN"));
    assert!(warning.contains("alpha"));
}

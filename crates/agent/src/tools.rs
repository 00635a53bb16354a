use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, input: Value) -> Result<Value>;
}

/// What the model is told about a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions sorted by name so prompts are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|left, right| left.name.cmp(&right.name));
        definitions
    }

    /// Runs one requested call. Failures become the tool's textual output so
    /// the model can see them.
    pub async fn invoke(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!(
                event_name = "agent.tool.unknown",
                tool = %call.name,
                "model requested an unregistered tool"
            );
            return format!("error: unknown tool `{}`", call.name);
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(Value::String(text)) => text,
            Ok(value) => value.to_string(),
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.tool.failed",
                    tool = %call.name,
                    error = %error,
                    "tool execution failed"
                );
                format!("error: {error}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// User-visible log line for a batch of tool calls.
pub fn summarize_calls(calls: &[ToolCall]) -> Option<String> {
    if calls.is_empty() {
        return None;
    }
    let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
    Some(format!("Called tools: {}", names.join(", ")))
}

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{summarize_calls, Tool, ToolCall, ToolRegistry};

    struct Weather;

    #[async_trait]
    impl Tool for Weather {
        fn name(&self) -> &'static str {
            "weather"
        }

        fn description(&self) -> &str {
            "Current weather for a city"
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            match input.get("city").and_then(Value::as_str) {
                Some(city) => Ok(Value::String(format!("sunny in {city}"))),
                None => bail!("city is required"),
            }
        }
    }

    struct Clock;

    #[async_trait]
    impl Tool for Clock {
        fn name(&self) -> &'static str {
            "clock"
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            Ok(json!({ "hour": 9 }))
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall { id: format!("call-{name}"), name: name.to_string(), arguments }
    }

    #[tokio::test]
    async fn invoke_renders_results_and_failures_as_text() {
        let mut registry = ToolRegistry::default();
        registry.register(Weather);
        registry.register(Clock);

        assert_eq!(registry.invoke(&call("weather", json!({ "city": "Oslo" }))).await, "sunny in Oslo");
        assert_eq!(registry.invoke(&call("clock", Value::Null)).await, r#"{"hour":9}"#);
        assert_eq!(registry.invoke(&call("weather", json!({}))).await, "error: city is required");
        assert_eq!(registry.invoke(&call("search", Value::Null)).await, "error: unknown tool `search`");
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::default();
        registry.register(Weather);
        registry.register(Clock);

        let names: Vec<String> =
            registry.definitions().into_iter().map(|definition| definition.name).collect();
        assert_eq!(names, vec!["clock".to_string(), "weather".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn tool_call_summary_lists_names_in_request_order() {
        assert_eq!(summarize_calls(&[]), None);
        assert_eq!(
            summarize_calls(&[call("weather", Value::Null), call("clock", Value::Null)]),
            Some("Called tools: weather, clock".to_string())
        );
    }
}

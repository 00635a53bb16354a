//! Prompt templates for every model call the engine makes, plus parsers for
//! the structured replies.

use serde::Deserialize;
use serde_json::Value;

pub const CLASSIFICATION_INSTRUCTION: &str = "\
Decide whether the conversation above gives enough information to carry out the user's latest request.
Reply with a single JSON object and nothing else:
{\"isInfoComplete\": true or false, \"missingInfoPrompt\": \"one question asking the user for what is missing, or an empty string\"}";

pub const SUMMARY_STRATEGY_INSTRUCTION: &str = "\
Summarize the conversation below for later reference.
Write in the third person. State only facts that appear in the conversation, in chronological order.
Do not add interpretation, advice or anything that was not said.";

pub const RETRY_EXHAUSTED_NOTICE: &str = "Proceeding with available information.";

pub const DEFAULT_CLARIFICATION_QUESTION: &str =
    "Could you share a few more details about what you need?";

/// Result of the information-completeness check.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_info_complete: bool,
    #[serde(default)]
    pub missing_info_prompt: String,
}

pub fn task_split(request: &str, max_sub_tasks: usize) -> String {
    format!(
        "Break the following request into at most {max_sub_tasks} ordered sub-tasks that can be \
         carried out one after another.\n\
         Reply with a JSON array of short sub-task names and nothing else.\n\n\
         Request:\n{request}"
    )
}

pub fn task_execute(goal: &str, current: &str, completed: &[(String, String)]) -> String {
    let mut prompt = format!("Overall goal:\n{goal}\n\nCurrent sub-task:\n{current}\n");
    if !completed.is_empty() {
        prompt.push_str("\nResults of earlier sub-tasks:\n");
        for (name, result) in completed {
            prompt.push_str(&format!("- {name}: {result}\n"));
        }
    }
    prompt.push_str("\nComplete the current sub-task only. Use the available tools when they help.");
    prompt
}

pub fn summarize(goal: &str, results: &[(String, String)]) -> String {
    let mut prompt = format!("Original request:\n{goal}\n\nSub-task results:\n");
    for (index, (name, result)) in results.iter().enumerate() {
        prompt.push_str(&format!("{}. {name}\n{result}\n\n", index + 1));
    }
    prompt.push_str("Write the final answer to the original request using these results.");
    prompt
}

/// Returns the JSON payload of a reply, tolerating code fences and leading prose.
pub fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    };

    match unfenced.find(['{', '[']) {
        Some(start) => &unfenced[start..],
        None => unfenced,
    }
}

pub fn parse_classification(reply: &str) -> Result<Classification, serde_json::Error> {
    let mut stream = serde_json::Deserializer::from_str(extract_json(reply)).into_iter();
    match stream.next() {
        Some(result) => result,
        None => serde_json::from_str(""),
    }
}

/// Parses a JSON array of names. Object entries contribute their `name`
/// (or `task`) field; blanks are skipped.
pub fn parse_task_list(reply: &str) -> Result<Vec<String>, serde_json::Error> {
    let mut stream = serde_json::Deserializer::from_str(extract_json(reply)).into_iter::<Vec<Value>>();
    let entries = match stream.next() {
        Some(result) => result?,
        None => return serde_json::from_str(""),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name),
            Value::Object(fields) => fields
                .get("name")
                .or_else(|| fields.get("task"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

//! Read-only view over host transcript records and the per-turn scanner.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classifier::ImageToolClassifier;

const DIRECT_NAME_FIELDS: [&str; 5] = [
    "tool_name",
    "toolName",
    "name",
    "function_name",
    "functionName",
];
const EXTRA_NAME_FIELDS: [&str; 5] = [
    "tool_name",
    "toolName",
    "function_name",
    "functionName",
    "tool",
];
const EXTRA_TOOL_MARKERS: [&str; 5] = [
    "tool",
    "tool_name",
    "functionName",
    "function_name",
    "tool_invocations",
];

/// An opaque message owned by the host. Only derived facts are inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationMessage(Value);

impl ConversationMessage {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self(json!({
            "role": "user",
            "is_user": true,
            "content": content.into(),
        }))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self(json!({
            "role": "assistant",
            "content": content.into(),
        }))
    }

    /// A standalone tool-call record naming a single tool.
    pub fn tool_call(tool_name: impl Into<String>) -> Self {
        Self(json!({
            "role": "tool",
            "is_tool": true,
            "tool_name": tool_name.into(),
        }))
    }

    /// An assistant message carrying a list of tool invocations.
    pub fn with_invocations<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocations: Vec<Value> = names
            .into_iter()
            .map(|name| json!({ "name": name.into() }))
            .collect();
        Self(json!({
            "role": "assistant",
            "extra": { "tool_invocations": invocations },
        }))
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn is_user_authored(&self) -> bool {
        let Some(obj) = self.0.as_object() else {
            return false;
        };
        obj.get("is_user").and_then(Value::as_bool) == Some(true)
            || obj.get("isUser").and_then(Value::as_bool) == Some(true)
            || str_field(&self.0, "role") == Some("user")
            || str_field(&self.0, "sender") == Some("user")
            || str_field(&self.0, "name") == Some("user")
    }

    pub fn is_tool_invocation(&self) -> bool {
        let Some(obj) = self.0.as_object() else {
            return false;
        };
        if obj.get("is_tool").and_then(Value::as_bool) == Some(true)
            || obj.get("isTool").and_then(Value::as_bool) == Some(true)
        {
            return true;
        }
        if matches!(str_field(&self.0, "role"), Some("tool" | "function")) {
            return true;
        }
        if is_present(obj.get("tool_call")) || is_present(obj.get("tool_calls")) {
            return true;
        }
        if matches!(str_field(&self.0, "type"), Some("tool" | "function")) {
            return true;
        }
        obj.get("extra")
            .and_then(Value::as_object)
            .is_some_and(|extra| EXTRA_TOOL_MARKERS.iter().any(|key| is_present(extra.get(*key))))
    }

    /// Name of the tool this record invokes, or an empty string.
    pub fn invoked_tool_name(&self) -> String {
        let raw = &self.0;

        let direct = DIRECT_NAME_FIELDS
            .iter()
            .find_map(|key| non_empty_str(raw.get(*key)));
        let from_extra = || {
            let extra = raw.get("extra")?;
            EXTRA_NAME_FIELDS
                .iter()
                .find_map(|key| non_empty_str(extra.get(*key)))
        };
        let from_tool_call = || raw.get("tool_call").and_then(call_name);
        let from_first_call = || {
            raw.get("tool_calls")
                .and_then(Value::as_array)
                .and_then(|calls| calls.first())
                .and_then(call_name)
        };

        direct
            .or_else(from_extra)
            .or_else(from_tool_call)
            .or_else(from_first_call)
            .unwrap_or_default()
            .to_string()
    }

    /// Names of every tool invocation embedded in this message, when it
    /// carries such a list.
    pub fn embedded_invocations(&self) -> Option<Vec<String>> {
        let list = self
            .0
            .get("extra")
            .and_then(|extra| extra.get("tool_invocations"))
            .and_then(Value::as_array)
            .or_else(|| self.0.get("tool_calls").and_then(Value::as_array))?;

        Some(
            list.iter()
                .filter_map(call_name)
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<Value> for ConversationMessage {
    fn from(raw: Value) -> Self {
        Self(raw)
    }
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn call_name(call: &Value) -> Option<&str> {
    non_empty_str(call.get("name"))
        .or_else(|| non_empty_str(call.get("function").and_then(|f| f.get("name"))))
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Count image tool invocations after the most recent user message.
///
/// `None` means the transcript could not be obtained and must not be read as
/// zero usage. A transcript without any user message yields `Some(0)`.
pub fn count_image_invocations_since_last_user_turn(
    transcript: Option<&[ConversationMessage]>,
    classifier: &ImageToolClassifier,
) -> Option<u32> {
    let messages = transcript?;

    let Some(last_user) = messages.iter().rposition(ConversationMessage::is_user_authored) else {
        return Some(0);
    };

    let mut count: u32 = 0;
    for message in &messages[last_user + 1..] {
        if let Some(invocations) = message.embedded_invocations() {
            let matched = invocations
                .iter()
                .filter(|name| classifier.is_image_tool(name))
                .count();
            count = count.saturating_add(u32::try_from(matched).unwrap_or(u32::MAX));
            continue;
        }

        if !message.is_tool_invocation() {
            continue;
        }
        let tool_name = message.invoked_tool_name();
        if !tool_name.is_empty()
            && (classifier.is_known(&tool_name) || classifier.is_image_tool(&tool_name))
        {
            count = count.saturating_add(1);
        }
    }

    Some(count)
}

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// The function half of a tool call. `arguments` is a JSON-encoded string,
/// stored verbatim — the memory layer never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    /// Decode the argument string for tool dispatch.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Build a call from structured arguments, serialized the way the wire
    /// expects them.
    pub fn function_with_args(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self::function(id, name, arguments.to_string())
    }
}

/// A single conversational turn or tool exchange. Plain value type — tool
/// pairing is by id equality, never by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// References the id of a prior assistant tool call. Only for `role: tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name, only for `role: tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// An assistant message carrying tool calls, with optional leading text.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// A tool-result message answering the call identified by `tool_call_id`.
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// True for an assistant message with at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// True if this message participates in a tool exchange on either side.
    pub fn is_tool_exchange(&self) -> bool {
        self.has_tool_calls() || self.role == Role::Tool
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Structural check over a persisted message list. Violations mean the file
/// was edited or written by something that doesn't know the schema.
pub fn validate_roles(messages: &[Message]) -> Result<(), String> {
    for (idx, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::System | Role::User => {
                if msg.tool_calls.is_some() {
                    return Err(format!("message {idx}: {} role carries tool_calls", msg.role));
                }
            }
            Role::Tool => {
                if msg.tool_call_id.is_none() {
                    return Err(format!("message {idx}: tool role without tool_call_id"));
                }
            }
            Role::Assistant => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        let t = Message::tool("c1", "read_file", "data");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(t.name.as_deref(), Some("read_file"));
    }

    #[test]
    fn has_tool_calls_requires_nonempty_list() {
        let plain = Message::assistant("hello");
        assert!(!plain.has_tool_calls());

        let with_calls = Message::assistant_with_tool_calls(
            None,
            vec![ToolCall::function("c1", "read_file", r#"{"path":"/a"}"#)],
        );
        assert!(with_calls.has_tool_calls());

        let empty = Message::assistant_with_tool_calls(Some("text".into()), vec![]);
        assert!(!empty.has_tool_calls());
    }

    #[test]
    fn structured_arguments_roundtrip() {
        let args = serde_json::json!({"path": "/a", "limit": 10});
        let call = ToolCall::function_with_args("c1", "read_file", &args);
        assert_eq!(call.function.parsed_arguments().unwrap(), args);
    }

    #[test]
    fn yaml_roundtrip_preserves_tool_call_shape() {
        let msg = Message::assistant_with_tool_calls(
            Some("working".into()),
            vec![ToolCall::function("call_abc", "read_file", r#"{"path":"/a"}"#)],
        );
        let yaml = serde_yaml::to_string(&msg).unwrap();
        assert!(yaml.contains("type: function"));
        assert!(yaml.contains("name: read_file"));

        let back: Message = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn optional_fields_are_omitted_from_yaml() {
        let yaml = serde_yaml::to_string(&Message::user("hi")).unwrap();
        assert!(!yaml.contains("tool_calls"));
        assert!(!yaml.contains("tool_call_id"));
        assert!(!yaml.contains("name"));
    }

    #[test]
    fn validate_rejects_user_with_tool_calls() {
        let mut msg = Message::user("hi");
        msg.tool_calls = Some(vec![ToolCall::function("c1", "x", "{}")]);
        assert!(validate_roles(&[msg]).is_err());
    }

    #[test]
    fn validate_rejects_tool_without_call_id() {
        let mut msg = Message::tool("c1", "x", "out");
        msg.tool_call_id = None;
        assert!(validate_roles(&[msg]).is_err());
    }

    #[test]
    fn validate_accepts_complete_exchange() {
        let messages = vec![
            Message::user("read /x"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::function("c1", "read_file", r#"{"path":"/x"}"#)],
            ),
            Message::tool("c1", "read_file", "file contents"),
            Message::assistant("done"),
        ];
        assert!(validate_roles(&messages).is_ok());
    }
}

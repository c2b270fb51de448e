use std::sync::Arc;

use anyhow::{Context, Result};
use chat_core::{ChatContext, ReadRequest};
use chat_protocol::{Channel, MessageEnvelope, ToolCall, ToolOutcome};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    SetHandle,
    GetHandle,
    PostMessage,
    ReadMessages,
    ListChannels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub kind: ToolKind,
}

/// Tools in registration order.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn with_chat_tools() -> Self {
        let mut registry = Self::default();

        registry.register(ToolDefinition {
            name: "set_handle".to_owned(),
            description:
                "Set your agent handle/username for chat. This identifies you in all messages."
                    .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "handle": { "type": "string", "description": "Your agent handle (username)" }
                },
                "required": ["handle"]
            }),
            kind: ToolKind::SetHandle,
        });

        registry.register(ToolDefinition {
            name: "post_message".to_owned(),
            description: "Post a message to a channel. Requires handle to be set first."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": channel_schema("Channel to post to"),
                    "message": { "type": "string", "description": "Message content to post" }
                },
                "required": ["channel", "message"]
            }),
            kind: ToolKind::PostMessage,
        });

        registry.register(ToolDefinition {
            name: "read_messages".to_owned(),
            description: "Read recent messages from a channel".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": channel_schema("Channel to read from"),
                    "limit": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Maximum number of messages to retrieve (default: 50)",
                        "default": 50
                    },
                    "newest": {
                        "type": "boolean",
                        "description": "Return the newest messages instead of the oldest retained ones (default: false)",
                        "default": false
                    }
                },
                "required": ["channel"]
            }),
            kind: ToolKind::ReadMessages,
        });

        registry.register(ToolDefinition {
            name: "list_channels".to_owned(),
            description: "List all available chat channels".to_owned(),
            input_schema: json!({ "type": "object", "properties": {} }),
            kind: ToolKind::ListChannels,
        });

        registry.register(ToolDefinition {
            name: "get_handle".to_owned(),
            description: "Get your current agent handle".to_owned(),
            input_schema: json!({ "type": "object", "properties": {} }),
            kind: ToolKind::GetHandle,
        });

        registry
    }
}

fn channel_schema(purpose: &str) -> Value {
    let ids: Vec<&str> = Channel::ALL.iter().map(|c| c.as_str()).collect();
    let described = Channel::ALL
        .iter()
        .map(|c| format!("{} ({})", c.as_str(), c.description()))
        .collect::<Vec<_>>()
        .join(", ");
    json!({
        "type": "string",
        "enum": ids,
        "description": format!("{purpose}: {described}"),
    })
}

#[derive(Debug, Deserialize)]
struct SetHandleInput {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageInput {
    channel: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReadMessagesInput {
    channel: String,
    #[serde(default, deserialize_with = "whole_number")]
    limit: Option<usize>,
    #[serde(default)]
    newest: bool,
}

/// Accept any JSON number with a whole, non-negative value; clients that
/// only have floats send `10.0` for 10.
fn whole_number<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(value) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(n) = value.as_u64() {
        return usize::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("limit {n} is too large")));
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 => Ok(Some(f as usize)),
        _ => Err(serde::de::Error::custom(format!(
            "limit must be a non-negative whole number, got {value}"
        ))),
    }
}

fn parse_input<T: for<'de> Deserialize<'de>>(tool: &str, input: &Value) -> Result<T> {
    let input = if input.is_null() { json!({}) } else { input.clone() };
    serde_json::from_value(input).with_context(|| format!("invalid arguments for {tool}"))
}

#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    chat: ChatContext,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, chat: ChatContext) -> Self {
        Self { registry, chat }
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    /// Run a tool call. Failures come back as [`ToolOutcome::Failure`] with
    /// a single `Error: ...` line rather than as `Err`.
    pub async fn dispatch(&self, call: ToolCall) -> ToolOutcome {
        match self.execute(&call).await {
            Ok(text) => ToolOutcome::Success { text },
            Err(error) => {
                warn!(tool = %call.tool_name, error = %format!("{error:#}"), "tool call failed");
                ToolOutcome::Failure {
                    error: format!("Error: {error:#}"),
                }
            }
        }
    }

    #[instrument(skip(self, call), fields(tool = %call.tool_name, call_id = %call.call_id))]
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        let definition = self
            .registry
            .get(&call.tool_name)
            .with_context(|| format!("Unknown tool: {}", call.tool_name))?;

        let text = match definition.kind {
            ToolKind::SetHandle => {
                let input: SetHandleInput = parse_input(&definition.name, &call.input)?;
                self.chat.set_handle(input.handle.clone());
                format!("Handle set to: {}", input.handle)
            }
            ToolKind::GetHandle => match self.chat.handle() {
                Some(handle) => format!("Current handle: {handle}"),
                None => "No handle set".to_owned(),
            },
            ToolKind::PostMessage => {
                let input: PostMessageInput = parse_input(&definition.name, &call.input)?;
                let channel: Channel = input.channel.parse()?;
                let sent = self.chat.publish(channel, &input.message).await?;
                format!(
                    "Message posted to #{} by {} at {}",
                    channel, sent.handle, sent.timestamp
                )
            }
            ToolKind::ReadMessages => {
                let input: ReadMessagesInput = parse_input(&definition.name, &call.input)?;
                let channel: Channel = input.channel.parse()?;
                let limit = input
                    .limit
                    .unwrap_or(self.chat.config().default_read_limit);
                let request = if input.newest {
                    ReadRequest::newest(limit)
                } else {
                    ReadRequest::oldest(limit)
                };
                let outcome = self.chat.read(channel, request).await?;
                render_messages(channel, &outcome.messages)
            }
            ToolKind::ListChannels => render_channels(&self.chat),
        };
        debug!("tool call finished");
        Ok(text)
    }
}

fn render_messages(channel: Channel, messages: &[MessageEnvelope]) -> String {
    let body = if messages.is_empty() {
        format!("No messages in #{channel} yet")
    } else {
        messages
            .iter()
            .map(|m| format!("[{}] {}: {}", m.timestamp, m.handle, m.message))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("=== #{channel} ({} messages) ===\n{body}", messages.len())
}

fn render_channels(chat: &ChatContext) -> String {
    let list = chat
        .list_channels()
        .iter()
        .map(|info| format!("• #{}: {}", info.channel, info.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Available channels:\n{list}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_broker::MemoryBroker;
    use chat_core::ChatConfig;

    use super::*;

    fn dispatcher() -> ToolDispatcher {
        let config = ChatConfig::default().fetch_expiry(Duration::from_millis(20));
        let chat = ChatContext::builder(config)
            .in_memory(MemoryBroker::new())
            .build();
        ToolDispatcher::new(Arc::new(ToolRegistry::with_chat_tools()), chat)
    }

    async fn call(dispatcher: &ToolDispatcher, tool: &str, input: Value) -> ToolOutcome {
        dispatcher.dispatch(ToolCall::new(tool, input)).await
    }

    #[test]
    fn registry_keeps_registration_order_and_channel_enum() {
        let registry = ToolRegistry::with_chat_tools();
        let names: Vec<_> = registry.definitions().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "set_handle",
                "post_message",
                "read_messages",
                "list_channels",
                "get_handle"
            ]
        );

        let post = registry.get("post_message").unwrap();
        assert_eq!(
            post.input_schema["properties"]["channel"]["enum"],
            json!(["roadmap", "coordination", "errors"])
        );
    }

    #[tokio::test]
    async fn handle_roundtrip() {
        let tools = dispatcher();
        assert_eq!(
            call(&tools, "get_handle", json!({})).await.text(),
            "No handle set"
        );
        assert_eq!(
            call(&tools, "set_handle", json!({"handle": "bob"})).await.text(),
            "Handle set to: bob"
        );
        assert_eq!(
            call(&tools, "get_handle", Value::Null).await.text(),
            "Current handle: bob"
        );
    }

    #[tokio::test]
    async fn post_requires_handle() {
        let tools = dispatcher();
        let outcome = call(
            &tools,
            "post_message",
            json!({"channel": "roadmap", "message": "hi"}),
        )
        .await;
        assert!(outcome.is_error());
        assert_eq!(outcome.text(), "Error: no handle set; use set_handle first");
    }

    #[tokio::test]
    async fn post_then_read_renders_history() {
        let tools = dispatcher();
        call(&tools, "set_handle", json!({"handle": "bob"})).await;

        let posted = call(
            &tools,
            "post_message",
            json!({"channel": "roadmap", "message": "hi"}),
        )
        .await;
        assert!(!posted.is_error());
        assert!(posted.text().starts_with("Message posted to #roadmap by bob at "));

        let read = call(&tools, "read_messages", json!({"channel": "roadmap"})).await;
        let text = read.text();
        assert!(text.starts_with("=== #roadmap (1 messages) ===\n["));
        assert!(text.ends_with("] bob: hi"));
    }

    #[tokio::test]
    async fn empty_channel_read_says_so() {
        let tools = dispatcher();
        let read = call(
            &tools,
            "read_messages",
            json!({"channel": "errors", "limit": 5}),
        )
        .await;
        assert_eq!(
            read.text(),
            "=== #errors (0 messages) ===\nNo messages in #errors yet"
        );
    }

    #[tokio::test]
    async fn newest_flag_reads_tail() {
        let tools = dispatcher();
        call(&tools, "set_handle", json!({"handle": "bob"})).await;
        for i in 0..4 {
            call(
                &tools,
                "post_message",
                json!({"channel": "coordination", "message": format!("m{i}")}),
            )
            .await;
        }

        let read = call(
            &tools,
            "read_messages",
            json!({"channel": "coordination", "limit": 2, "newest": true}),
        )
        .await;
        let lines: Vec<_> = read.text().lines().skip(1).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("bob: m2"));
        assert!(lines[1].ends_with("bob: m3"));
    }

    #[tokio::test]
    async fn list_channels_needs_no_broker() {
        let tools = dispatcher();
        let outcome = call(&tools, "list_channels", json!({})).await;
        assert_eq!(
            outcome.text(),
            "Available channels:\n\
             • #roadmap: Agent roadmap discussions and planning\n\
             • #coordination: Parallel work coordination and task distribution\n\
             • #errors: Error reporting and debugging discussions"
        );
    }

    #[tokio::test]
    async fn invalid_calls_fail_with_single_line() {
        let tools = dispatcher();
        let unknown = call(&tools, "delete_everything", json!({})).await;
        assert_eq!(unknown.text(), "Error: Unknown tool: delete_everything");

        let bad_channel = call(
            &tools,
            "read_messages",
            json!({"channel": "random"}),
        )
        .await;
        assert_eq!(bad_channel.text(), "Error: unknown channel: random");

        let missing = call(&tools, "set_handle", json!({})).await;
        assert!(missing.is_error());
        assert!(missing.text().starts_with("Error: invalid arguments for set_handle"));
        assert!(!missing.text().contains('\n'));
    }

    #[tokio::test]
    async fn float_limit_with_whole_value_is_accepted() {
        let tools = dispatcher();
        call(&tools, "set_handle", json!({"handle": "bob"})).await;
        for i in 0..3 {
            call(
                &tools,
                "post_message",
                json!({"channel": "roadmap", "message": format!("m{i}")}),
            )
            .await;
        }

        let read = call(
            &tools,
            "read_messages",
            json!({"channel": "roadmap", "limit": 2.0}),
        )
        .await;
        assert!(!read.is_error(), "{}", read.text());
        assert!(read.text().starts_with("=== #roadmap (2 messages) ==="));

        let fractional = call(
            &tools,
            "read_messages",
            json!({"channel": "roadmap", "limit": 2.5}),
        )
        .await;
        assert!(fractional.is_error());
        assert!(fractional.text().contains("non-negative whole number"));

        let negative = call(
            &tools,
            "read_messages",
            json!({"channel": "roadmap", "limit": -1}),
        )
        .await;
        assert!(negative.is_error());
    }
}

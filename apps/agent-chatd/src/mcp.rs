//! Minimal MCP server: newline-delimited JSON-RPC 2.0 over stdio, exposing
//! the chat tools.

use anyhow::Result;
use chat_protocol::ToolCall;
use chat_tools::ToolDispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// `None` only when the member is absent; an explicit `null` id is kept.
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct McpServer {
    dispatcher: ToolDispatcher,
}

impl McpServer {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Answer requests line by line until the reader reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }
        debug!("stdin closed");
        Ok(())
    }

    /// `None` for notifications, which get no reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "unparsable request");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {error}"),
                ));
            }
        };

        let Some(id) = request.id else {
            debug!(method = %request.method, "notification");
            return None;
        };

        Some(match self.handle(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value, (i64, String)> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "agent-chat",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let registry = self.dispatcher.registry();
                let tools: Vec<Value> = registry
                    .definitions()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema,
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: CallToolParams = serde_json::from_value(params)
                    .map_err(|error| (INVALID_PARAMS, format!("invalid params: {error}")))?;
                let outcome = self
                    .dispatcher
                    .dispatch(ToolCall::new(params.name, params.arguments))
                    .await;
                Ok(json!({
                    "content": [{ "type": "text", "text": outcome.text() }],
                    "isError": outcome.is_error(),
                }))
            }
            other => Err((METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chat_broker::MemoryBroker;
    use chat_core::{ChatConfig, ChatContext};
    use chat_tools::ToolRegistry;

    use super::*;

    fn server() -> McpServer {
        let config = ChatConfig::default().fetch_expiry(Duration::from_millis(20));
        let chat = ChatContext::builder(config)
            .in_memory(MemoryBroker::new())
            .build();
        McpServer::new(ToolDispatcher::new(
            Arc::new(ToolRegistry::with_chat_tools()),
            chat,
        ))
    }

    async fn reply(server: &McpServer, line: &str) -> Value {
        let response = server.handle_line(line).await.unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn initialize_advertises_tools_capability() {
        let server = server();
        let value = reply(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(value["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let server = server();
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn null_id_is_a_request_not_a_notification() {
        let server = server();
        let value = reply(&server, r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).await;
        assert!(value["id"].is_null());
        assert_eq!(value["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_list_exposes_five_tools() {
        let server = server();
        let value = reply(&server, r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#).await;
        let tools = value["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 5);
        assert_eq!(tools[0]["name"], "set_handle");
        assert!(tools[0]["inputSchema"]["required"].is_array());
    }

    #[tokio::test]
    async fn tool_failure_is_a_result_with_is_error() {
        let server = server();
        let value = reply(
            &server,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"post_message","arguments":{"channel":"roadmap","message":"hi"}}}"#,
        )
        .await;
        assert!(value.get("error").is_none());
        assert_eq!(value["result"]["isError"], true);
        assert_eq!(
            value["result"]["content"][0]["text"],
            "Error: no handle set; use set_handle first"
        );
    }

    #[tokio::test]
    async fn protocol_errors_use_jsonrpc_codes() {
        let server = server();
        let unknown = reply(&server, r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#).await;
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);

        let garbage = reply(&server, "{oops").await;
        assert_eq!(garbage["error"]["code"], PARSE_ERROR);
        assert!(garbage["id"].is_null());

        let bad_params = reply(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}"#,
        )
        .await;
        assert_eq!(bad_params["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn serve_answers_each_request_line() -> Result<()> {
        let server = server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"set_handle","arguments":{"handle":"bob"}}}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"post_message","arguments":{"channel":"errors","message":"boom"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"read_messages","arguments":{"channel":"errors"}}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await?;

        let replies: Vec<Value> = String::from_utf8(output)?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["result"]["content"][0]["text"], "Handle set to: bob");
        assert_eq!(replies[1]["result"]["isError"], false);
        let history = replies[2]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(history.starts_with("=== #errors (1 messages) ==="));
        assert!(history.ends_with("bob: boom"));
        Ok(())
    }
}

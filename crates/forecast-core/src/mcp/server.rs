use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::jsonrpc::{
    is_response, JsonRpcIncoming, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use super::registry::CapabilityRegistry;
use super::types::{
    CallToolParams, CallToolResult, Implementation, ListResourcesResult, ListToolsResult,
    ReadResourceResult, CANCELLED, INITIALIZE, INITIALIZED, PING, PROTOCOL_VERSION,
    RESOURCES_LIST, RESOURCES_READ, TOOLS_CALL, TOOLS_LIST,
};

type RpcResult = std::result::Result<Value, (i64, String)>;

#[derive(Deserialize)]
struct ReadResourceParams {
    uri: String,
}

/// Provider side of the protocol: answers discovery and invocation requests
/// from a [`CapabilityRegistry`], one line-delimited JSON message at a time.
pub struct McpServer {
    info: Implementation,
    registry: CapabilityRegistry,
}

impl McpServer {
    pub fn new(info: Implementation, registry: CapabilityRegistry) -> Self {
        Self { info, registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until the peer closes its end of the stream.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        info!("client closed the connection");
        Ok(())
    }

    /// Handle one inbound line. Notifications and stray responses produce no
    /// reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!("unparseable message: {e}");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };
        if is_response(&raw) {
            debug!("ignoring response from client");
            return None;
        }

        let fallback_id = raw.get("id").cloned().unwrap_or(Value::Null);
        let incoming: JsonRpcIncoming = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    fallback_id,
                    INVALID_REQUEST,
                    format!("invalid request: {e}"),
                ))
            }
        };
        if incoming.jsonrpc != "2.0" {
            debug!("peer sent jsonrpc version {:?}", incoming.jsonrpc);
        }

        let Some(id) = incoming.id.clone() else {
            self.on_notification(&incoming.method, incoming.params.as_ref());
            return None;
        };

        debug!("request {} (id={})", incoming.method, id);
        Some(match self.dispatch(&incoming.method, incoming.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    fn on_notification(&self, method: &str, params: Option<&Value>) {
        match method {
            INITIALIZED => info!("client initialized"),
            CANCELLED => {
                // Requests are handled to completion before the next line is
                // read, so there is never anything left to abort.
                let id = params.and_then(|p| p.get("requestId")).cloned();
                debug!("client cancelled request {:?}", id);
            }
            other => debug!("ignoring notification {other}"),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> RpcResult {
        match method {
            INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "resources": { "subscribe": false, "listChanged": false }
                },
                "serverInfo": self.info
            })),
            PING => Ok(json!({})),
            TOOLS_LIST => to_value(ListToolsResult {
                tools: self.registry.tool_descriptors(),
            }),
            TOOLS_CALL => self.call_tool(params).await,
            RESOURCES_LIST => to_value(ListResourcesResult {
                resources: self.registry.resource_descriptors(),
            }),
            RESOURCES_READ => self.read_resource(params).await,
            other => Err((METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> RpcResult {
        let params: CallToolParams = parse_params(params)?;
        let tool = self
            .registry
            .tool(&params.name)
            .ok_or_else(|| (INVALID_PARAMS, format!("unknown tool: {}", params.name)))?;

        info!("calling tool {} with {}", params.name, params.arguments);
        let result = match tool.call(params.arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!("tool {} failed: {e}", params.name);
                CallToolResult::err(e.to_string())
            }
        };
        to_value(result)
    }

    async fn read_resource(&self, params: Option<Value>) -> RpcResult {
        let params: ReadResourceParams = parse_params(params)?;
        let resource = self
            .registry
            .resource(&params.uri)
            .ok_or_else(|| (INVALID_PARAMS, format!("unknown resource: {}", params.uri)))?;
        let contents = resource
            .read()
            .await
            .map_err(|e| (INTERNAL_ERROR, format!("reading {} failed: {e}", params.uri)))?;
        to_value(ReadResourceResult { contents })
    }
}

fn parse_params<T>(params: Option<Value>) -> std::result::Result<T, (i64, String)>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| (INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::jsonrpc::JsonRpcResponse;
use super::transport::Transport;
use super::types::{
    CallToolResult, Implementation, ListResourcesResult, ListToolsResult, ReadResourceResult,
    ResourceContents, ResourceDescriptor, ToolDescriptor, INITIALIZE, INITIALIZED, PING,
    PROTOCOL_VERSION, RESOURCES_LIST, RESOURCES_READ, TOOLS_CALL, TOOLS_LIST,
};
use crate::error::{ForecastError, Result};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on `initialize`; expiry is a connection failure.
    pub handshake_timeout: Option<Duration>,
    /// Bound on every other request.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(10)),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

// ── McpClient ────────────────────────────────────────────────────────────────

pub struct McpClient {
    pub server_name: String,
    transport: Transport,
    options: ClientOptions,
    server_info: Option<Implementation>,
    known_tools: RwLock<Option<Vec<ToolDescriptor>>>,
}

impl McpClient {
    /// Spawn a provider process and complete the handshake with it.
    pub async fn connect_stdio(
        server_name: impl Into<String>,
        command: &str,
        args: &[String],
        options: ClientOptions,
    ) -> Result<Self> {
        let server_name = server_name.into();
        let transport = Transport::spawn(command, args).map_err(|e| match e {
            ForecastError::Connection { reason, .. } => ForecastError::Connection {
                server: server_name.clone(),
                reason,
            },
            other => other,
        })?;
        Self::connect(server_name, transport, options).await
    }

    /// Complete the handshake over an already-established transport.
    pub async fn connect(
        server_name: impl Into<String>,
        transport: Transport,
        options: ClientOptions,
    ) -> Result<Self> {
        let mut client = Self {
            server_name: server_name.into(),
            transport,
            options,
            server_info: None,
            known_tools: RwLock::new(None),
        };
        if let Err(e) = client.initialize().await {
            client.transport.close().await;
            return Err(ForecastError::Connection {
                server: client.server_name,
                reason: format!("handshake failed: {e}"),
            });
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "forecast",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let response = self
            .transport
            .request(INITIALIZE, Some(params), self.options.handshake_timeout)
            .await?;
        let result = into_result(INITIALIZE, response)?;
        self.server_info = result
            .get("serverInfo")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        info!(
            "MCP connected: {} (protocol {})",
            self.server_info
                .as_ref()
                .map(|i| i.name.as_str())
                .unwrap_or("unknown"),
            result["protocolVersion"].as_str().unwrap_or("?")
        );

        self.transport.notify(INITIALIZED, None).await
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    async fn request<T>(&self, method: &str, params: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .transport
            .request(method, params, self.options.request_timeout)
            .await?;
        let result = into_result(method, response)?;
        serde_json::from_value(result)
            .map_err(|e| ForecastError::Protocol(format!("{method}: malformed result: {e}")))
    }

    pub async fn ping(&self) -> Result<()> {
        self.request::<Value>(PING, None).await.map(|_| ())
    }

    /// Discover the provider's tools. The result becomes the last-known set
    /// used to pre-check [`call_tool`](Self::call_tool).
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let listed: ListToolsResult = self.request(TOOLS_LIST, None).await?;
        *self.known_tools.write().await = Some(listed.tools.clone());
        Ok(listed.tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let listed: ListResourcesResult = self.request(RESOURCES_LIST, None).await?;
        Ok(listed.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let read: ReadResourceResult = self
            .request(RESOURCES_READ, Some(json!({ "uri": uri })))
            .await?;
        Ok(read.contents)
    }

    /// Invoke a tool. A provider-reported failure (error result or JSON-RPC
    /// error) is a [`ForecastError::ToolExecution`].
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult> {
        if let Some(known) = self.known_tools.read().await.as_ref() {
            if !known.iter().any(|t| t.name == tool_name) {
                return Err(ForecastError::ToolNotFound {
                    name: tool_name.to_string(),
                });
            }
        }

        let params = json!({
            "name": tool_name,
            "arguments": arguments
        });
        debug!("calling tool {} on {}", tool_name, self.server_name);
        let response = self
            .transport
            .request(TOOLS_CALL, Some(params), self.options.request_timeout)
            .await?;

        if let Some(err) = response.error {
            return Err(ForecastError::ToolExecution {
                name: tool_name.to_string(),
                message: format!("server error {}: {}", err.code, err.message),
            });
        }
        let result = response.result.ok_or_else(|| {
            ForecastError::Protocol(format!("{TOOLS_CALL}: response has no result"))
        })?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| ForecastError::Protocol(format!("{TOOLS_CALL}: malformed result: {e}")))?;

        if result.is_error {
            return Err(ForecastError::ToolExecution {
                name: tool_name.to_string(),
                message: result.text(),
            });
        }
        Ok(result)
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Idempotent; also terminates the provider process if this client spawned it.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

fn into_result(method: &str, response: JsonRpcResponse) -> Result<Value> {
    if let Some(err) = response.error {
        return Err(ForecastError::Protocol(format!(
            "{method}: server error {}: {}",
            err.code, err.message
        )));
    }
    response
        .result
        .ok_or_else(|| ForecastError::Protocol(format!("{method}: response has no result")))
}

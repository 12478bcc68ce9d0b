pub mod agents;
pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;

pub use agents::agent::{Agent, AgentOutput, ForecastAgent, ForecastAgentBuilder};
pub use config::config::{ForecastConfig, ServerConfig, ToolCallPolicy};
pub use error::{ForecastError, Result};
pub use mcp::client::{ClientOptions, McpClient};
pub use mcp::registry::{CapabilityRegistry, ResourceHandler, StaticResource, ToolHandler};
pub use mcp::server::McpServer;
pub use mcp::transport::Transport;
pub use mcp::types::{
    CallToolResult, Content, Implementation, ResourceContents, ResourceDescriptor, ToolDescriptor,
};
pub use providers::provider::{
    FinishReason, LlmProvider, LlmResponse, TokenUsage, ToolCall, ToolDef, Turn,
};
pub use providers::OpenAiProvider;

pub mod client;
pub mod jsonrpc;
pub mod registry;
pub mod server;
pub mod tool;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, McpClient};
pub use registry::{CapabilityRegistry, ResourceHandler, StaticResource, ToolHandler};
pub use server::McpServer;
pub use tool::{tool_def, tool_defs};
pub use transport::Transport;
pub use types::{
    CallToolResult, Content, Implementation, ResourceContents, ResourceDescriptor, ToolDescriptor,
};

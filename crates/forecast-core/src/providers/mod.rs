pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::{FinishReason, LlmProvider, LlmResponse, TokenUsage, ToolCall, ToolDef, Turn};

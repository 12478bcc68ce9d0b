pub mod agent;
pub mod conversation;

pub use agent::{Agent, AgentOutput, ForecastAgent, ForecastAgentBuilder};
pub use conversation::ConversationState;

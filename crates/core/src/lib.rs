//! # forgehand core
//!
//! Domain types, traits, and error definitions for the forgehand coding-agent
//! runtime. Every other crate depends inward on this one.
//!
//! ## Layout
//!
//! - [`message`]: the ordered conversation sent to the model
//! - [`tool`]: the single capability interface every tool implements, plus the
//!   name-keyed registry that turns every fault into a failed [`ToolResult`]
//! - [`provider`]: the LLM client abstraction
//! - [`memory`]: long-term memory cards and the store they persist to
//! - [`event`]: typed observability events delivered over a broadcast bus

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{AgentEvent, EventBus, RequestStats};
pub use memory::{MemoryCard, MemoryStore};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use tool::{FileAccess, RiskLevel, Tool, ToolCall, ToolRegistry, ToolResult};

//! The agent loop and context manager — the heart of forgehand.
//!
//! A run follows a **call model → run tools → call model** cycle:
//!
//! 1. **Receive** the user's input, with relevant memory cards injected before it
//! 2. **Check the budget**: compress older history into a summary when needed
//! 3. **Send to the model** through the configured provider
//! 4. **If tool calls**: schedule them (optionally concurrently), append the
//!    results in call order, loop back to step 2
//! 5. **If text**: that is the final answer
//!
//! The loop stops with [`forgehand_core::Error::IterationLimitExceeded`] when
//! the model keeps asking for tools past the configured number of turns.

pub mod context;
pub mod loop_runner;
pub mod subagent;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{CompressionReport, ContextConfig, ContextManager, Summarizer};
pub use loop_runner::{AgentConfig, AgentLoop, AgentSession, TOOLS_DISABLED_NOTICE};
pub use subagent::SubagentTool;

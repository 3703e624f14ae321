//! LLM provider implementations for forgehand.
//!
//! All providers implement the `forgehand_core::Provider` trait; the agent
//! loop never knows which backend it is talking to.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

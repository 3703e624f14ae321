//! Context management: token accounting, compression and memory injection.

pub mod manager;
pub mod summarizer;
pub mod token;

pub use manager::{
    CompressionReport, ContextConfig, ContextManager, MEMORY_MESSAGE_NAME, MemoryInjection, SUMMARY_MESSAGE_NAME,
    model_context_window,
};
pub use summarizer::{Summarizer, Summary, SummaryError};

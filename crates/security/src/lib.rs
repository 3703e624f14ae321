//! Security module for forgehand — filesystem sandboxing for file tools.
//!
//! Provides:
//! - **Path validation**: every tool path resolves inside the project root
//! - **Sensitive files**: secrets and VCS internals are never read or written

pub mod path;
pub mod sensitive;

pub use path::{PathValidationError, Workspace};
pub use sensitive::SensitiveFiles;

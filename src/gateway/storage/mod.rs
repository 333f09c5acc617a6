//! Storage abstractions for per-session target state.
//!
//! This module provides a trait-based registry abstraction that enables:
//! - Dependency injection for testability
//! - Lock-free concurrent access via the DashMap implementation
//! - Clean separation between storage and protocol logic

mod session;
mod traits;

pub use session::DashMapSessionRegistry;
pub use traits::{ClaimOutcome, SessionRegistry, SessionSnapshot};

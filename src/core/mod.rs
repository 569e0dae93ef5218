//! Core chat client components
//!
//! This module contains the session state and the logic that keeps the
//! displayed transcript consistent.

mod chat;
pub mod context;
mod reconciler;
pub mod store;

pub use chat::ChatSession;
pub use context::SessionContext;
pub use store::SqliteStore;

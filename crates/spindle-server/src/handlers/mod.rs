//! HTTP request handlers

pub mod chat;
pub mod health;
pub mod models;

// Re-export handler modules for convenience
pub use chat::*;
pub use health::*;
pub use models::*;

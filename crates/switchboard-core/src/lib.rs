//! Core types, config, errors, and conversation model for switchboard.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod items;
pub mod usage;

pub use config::ApiConfig;
pub use context::RunContext;
pub use error::{AgentError, Result};
pub use events::StreamEvent;
pub use items::{Item, Role, RunInput};
pub use usage::Usage;

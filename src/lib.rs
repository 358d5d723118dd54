//! Certkeeper library
//!
//! Issues, persists and renews X.509 certificates described by request
//! files, and provides the remote agent that stores the resulting material.

pub mod api;
pub mod config;
pub mod daemon;
pub mod models;
pub mod server;
pub mod services;
pub mod utils;

pub use config::AppConfig;
use services::AgentService;

/// Agent state shared across handlers
#[derive(Clone, Default)]
pub struct AgentState {
    pub agent: AgentService,
}

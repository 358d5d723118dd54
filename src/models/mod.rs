//! Data models

mod agent;
mod request;

pub use agent::*;
pub use request::*;

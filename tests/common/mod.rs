//! Common test utilities and helpers
//!
//! - Temporary workspaces with request, output and issuer directories
//! - Certificate request descriptor fixtures
//! - In-process agent test client

pub mod fixtures;
pub mod test_app;

pub use fixtures::*;
pub use test_app::*;

//! Step definitions for Cucumber scenarios

pub mod agent_steps;

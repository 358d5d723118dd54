//! Integration tests for certkeeper
//!
//! These tests drive the manager against real request files in temporary
//! directories and the agent router in-process.

mod agent_tests;
mod watcher_tests;

// ABOUTME: Library root for cutover - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod output;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod traffic;
pub mod types;

//! Polyquery CLI
//!
//! This crate provides the command-line interface for Polyquery including:
//! - run: Start the server
//! - dev: Start in development mode with hot reload
//! - init: Write a starter configuration
//! - validate: Check a configuration without starting
//! - health, query, schema: Talk to a running server

pub mod commands;

pub use commands::{Cli, Commands};

//! Cycle-time analysis CLI library.
//!
//! This crate provides the CLI interface for the cycle-time engine.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, EngineArgs, InputArgs, InputFormat};
pub use config::Config;

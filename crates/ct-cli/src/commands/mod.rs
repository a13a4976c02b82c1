//! CLI subcommand implementations.

pub mod analyze;
pub mod export;
pub mod ingest;

// src/core/mod.rs

/// Per-request memoization of checks and parses.
pub mod cache;
/// Runs a resolved command with its hooks.
pub mod command_executor;
/// Engine configuration loaded from TOML.
pub mod config;
/// The `CommandService` facade.
pub mod dispatcher;
/// Outcome listeners and their error sinks.
pub mod events;
/// Typed argument parsers.
pub mod parsers;
/// Command and parameter preconditions.
pub mod preconditions;
/// Input resolution and candidate scoring.
pub mod resolver;
/// Comparable candidate outcomes.
pub mod score;
/// Splitting raw input into tokens.
pub mod tokenizer;
/// The path-indexed command registry.
pub mod trie;

#[cfg(test)]
pub(crate) mod test_support;

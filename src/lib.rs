//! parley: a trie-indexed text command resolution, scoring and dispatch engine.
//!
//! Commands are registered under one or more name paths in a [`core::trie::CommandTrie`].
//! A line of input is tokenized, every command whose name prefixes the input is
//! scored by [`core::resolver::Resolver`], and the best candidate is executed by
//! [`core::command_executor::CommandExecutor::execute`], with the outcome published through
//! [`core::events::EventHub`]. [`core::dispatcher::CommandService`] wires it all together.

/// Command-line front-end of the `parley` binary.
pub mod cli;
/// Shared defaults and names.
pub mod constants;
/// The resolution and execution engine.
pub mod core;
/// Commands, parameters, values and contexts.
pub mod models;
/// Runtime services such as the background queue.
pub mod system;

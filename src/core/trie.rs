// src/core/trie.rs

//! # Trie Registry
//!
//! Commands are stored at the node reached by walking their name path, one
//! token per level. Walking the input tokens from the root therefore visits
//! every command whose name is a prefix of the input, at every depth.
//!
//! All node maps are `DashMap`s: adds, removals and walks run concurrently
//! without an external lock. A walk may miss a concurrent insert or observe a
//! concurrent removal; the registry is eventually consistent, not snapshot
//! isolated.
//!
//! Empty nodes are pruned on removal with a compare-and-remove: a node is only
//! unlinked from its parent while it is still empty, and it is flagged
//! `detached` first. An add that raced with the pruning sees the flag, undoes
//! its insert and walks the path again.

use crate::{
    core::parsers::ParserGateway,
    models::{Command, Span},
};
use dashmap::{DashMap, mapref::entry::Entry};
use log::{debug, trace};
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use thiserror::Error;
use uuid::Uuid;

/// Structural problems detected when a command is registered.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The command is structurally unusable.
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// What is wrong with it.
        reason: String,
    },
    /// A parameter has no parser override and none is registered for its type.
    #[error("No parser is registered for type '{type_name}' (parameter '{parameter}').")]
    UnregisteredParser {
        /// Name of the parameter.
        parameter: String,
        /// Name of its value type.
        type_name: &'static str,
    },
}

/// A command yielded by [`CommandTrie::iterate`].
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Number of input tokens matched by the command's name.
    pub depth: usize,
    /// Registration order of the command; lower registered first.
    pub sequence: u64,
    /// The matched command.
    pub command: Arc<Command>,
}

#[derive(Clone)]
struct Slot {
    sequence: u64,
    command: Arc<Command>,
}

struct TrieNode {
    /// Normalized lookup key in the parent's child map.
    key: String,
    commands: DashMap<Uuid, Slot>,
    children: DashMap<String, Arc<TrieNode>>,
    parent: Weak<TrieNode>,
    detached: AtomicBool,
}

impl TrieNode {
    fn root() -> Self {
        Self {
            key: String::new(),
            commands: DashMap::new(),
            children: DashMap::new(),
            parent: Weak::new(),
            detached: AtomicBool::new(false),
        }
    }

    fn child(key: String, parent: &Arc<TrieNode>) -> Self {
        Self {
            key,
            commands: DashMap::new(),
            children: DashMap::new(),
            parent: Arc::downgrade(parent),
            detached: AtomicBool::new(false),
        }
    }

    fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.children.is_empty()
    }

    /// Flags the node as detached if it is empty. Must be called while the
    /// parent's map entry for this node is locked.
    fn try_detach(&self) -> bool {
        self.detached.store(true, Ordering::SeqCst);
        if self.is_empty() {
            true
        } else {
            self.detached.store(false, Ordering::SeqCst);
            false
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Commands stored directly at this node, in registration order.
    fn snapshot(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.commands.iter().map(|e| e.value().clone()).collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots
    }
}

/// A concurrent, path-indexed command registry.
pub struct CommandTrie {
    root: Arc<TrieNode>,
    registered: DashMap<Uuid, Slot>,
    gateway: Arc<ParserGateway>,
    case_sensitive: bool,
    separator: char,
    next_sequence: AtomicU64,
}

impl CommandTrie {
    /// An empty registry that resolves parsers through `gateway`.
    pub fn new(gateway: Arc<ParserGateway>, case_sensitive: bool, separator: char) -> Self {
        Self {
            root: Arc::new(TrieNode::root()),
            registered: DashMap::new(),
            gateway,
            case_sensitive,
            separator,
            next_sequence: AtomicU64::new(0),
        }
    }

    /// The gateway used to validate parameters on `add`.
    pub fn gateway(&self) -> &Arc<ParserGateway> {
        &self.gateway
    }

    fn normalize(&self, token: &str) -> String {
        normalize_token(token, self.case_sensitive)
    }

    /// Registers `command` under each of its paths.
    ///
    /// Returns the number of paths added. A command that is already registered
    /// (same primary id) is left untouched and `0` is returned.
    ///
    /// # Errors
    /// `InvalidCommand` when a path is empty, a token is empty or contains the
    /// separator, a remainder parameter is not last, or a parser's context type
    /// can never run under the command's context type. `UnregisteredParser`
    /// when a parameter has no parser.
    pub fn add(&self, command: Arc<Command>) -> Result<usize, RegistrationError> {
        self.validate(&command)?;

        let sequence = match self.registered.entry(command.id()) {
            Entry::Occupied(_) => {
                debug!("Command '{}' is already registered.", command.display_name());
                return Ok(0);
            }
            Entry::Vacant(vacant) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                vacant.insert(Slot {
                    sequence,
                    command: Arc::clone(&command),
                });
                sequence
            }
        };

        let added = command
            .paths()
            .iter()
            .filter(|path| self.insert_path(path, &command, sequence))
            .count();
        debug!(
            "Registered command '{}' under {} path(s).",
            command.display_name(),
            added
        );
        Ok(added)
    }

    fn validate(&self, command: &Command) -> Result<(), RegistrationError> {
        let invalid = |reason: String| RegistrationError::InvalidCommand { reason };

        if command.paths().is_empty() {
            return Err(invalid("a command needs at least one path".to_string()));
        }
        for path in command.paths() {
            if path.is_empty() {
                return Err(invalid(format!(
                    "command '{}' has an empty path",
                    command.display_name()
                )));
            }
            for token in path {
                if token.is_empty() {
                    return Err(invalid(format!(
                        "path '{}' contains an empty token",
                        path.join(" ")
                    )));
                }
                if token.contains(self.separator) {
                    return Err(invalid(format!(
                        "token '{}' contains the separator {:?}",
                        token, self.separator
                    )));
                }
            }
        }

        let last = command.parameters().len().saturating_sub(1);
        for (index, parameter) in command.parameters().iter().enumerate() {
            if parameter.span() == Span::Remainder && index != last {
                return Err(invalid(format!(
                    "remainder parameter '{}' must be the last parameter",
                    parameter.name()
                )));
            }
            let parser = self.gateway.resolve(parameter)?;
            if !parser.context_type().is_compatible_with(command.context_type()) {
                return Err(invalid(format!(
                    "the parser for parameter '{}' runs under '{}' contexts, which never overlap '{}'",
                    parameter.name(),
                    parser.context_type(),
                    command.context_type()
                )));
            }
        }
        Ok(())
    }

    fn insert_path(&self, path: &[String], command: &Arc<Command>, sequence: u64) -> bool {
        loop {
            let mut trail = Vec::with_capacity(path.len());
            let mut node = Arc::clone(&self.root);
            for token in path {
                let key = self.normalize(token);
                let child = Arc::clone(
                    &node
                        .children
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(TrieNode::child(key, &node))),
                );
                trail.push(Arc::clone(&child));
                node = child;
            }

            let slot = Slot {
                sequence,
                command: Arc::clone(command),
            };
            let inserted = node.commands.insert(command.id(), slot).is_none();

            if trail.iter().any(|n| n.is_detached()) {
                trace!(
                    "Path '{}' was pruned concurrently; retrying.",
                    path.join(" ")
                );
                if inserted {
                    node.commands.remove(&command.id());
                }
                continue;
            }
            return inserted;
        }
    }

    /// Unregisters `command` from every path and prunes the nodes that became
    /// empty. Returns the number of paths removed.
    pub fn remove(&self, command: &Command) -> usize {
        if self.registered.remove(&command.id()).is_none() {
            return 0;
        }

        let mut removed = 0;
        for path in command.paths() {
            let Some(node) = self.find_node(path) else {
                continue;
            };
            if node.commands.remove(&command.id()).is_some() {
                removed += 1;
                self.prune(node);
            }
        }
        debug!(
            "Removed command '{}' from {} path(s).",
            command.display_name(),
            removed
        );
        removed
    }

    fn find_node(&self, path: &[String]) -> Option<Arc<TrieNode>> {
        let mut node = Arc::clone(&self.root);
        for token in path {
            let child = node
                .children
                .get(&self.normalize(token))
                .map(|entry| Arc::clone(entry.value()))?;
            node = child;
        }
        Some(node)
    }

    fn prune(&self, mut node: Arc<TrieNode>) {
        while let Some(parent) = node.parent.upgrade() {
            let unlinked = parent
                .children
                .remove_if(&node.key, |_, child| Arc::ptr_eq(child, &node) && child.try_detach())
                .is_some();
            if !unlinked {
                break;
            }
            trace!("Pruned empty node '{}'.", node.key);
            node = parent;
        }
    }

    /// Lazily walks `tokens` from the root, yielding every command stored on
    /// the way together with the number of tokens matched so far.
    pub fn iterate<'t>(&self, tokens: &'t [String]) -> TrieWalk<'t> {
        TrieWalk {
            next_node: Some(Arc::clone(&self.root)),
            depth: 0,
            tokens,
            case_sensitive: self.case_sensitive,
            pending: Vec::new().into_iter(),
            pending_depth: 0,
        }
    }

    /// Number of distinct registered commands.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    /// True when no command is registered.
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Path-independent membership test.
    pub fn contains(&self, command: &Command) -> bool {
        self.registered.contains_key(&command.id())
    }

    /// Every registered command, in registration order.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        let mut slots: Vec<Slot> = self.registered.iter().map(|e| e.value().clone()).collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots.into_iter().map(|slot| slot.command).collect()
    }

    /// Number of nodes below the root. Used to check pruning.
    pub fn node_count(&self) -> usize {
        fn count(node: &TrieNode) -> usize {
            node.children
                .iter()
                .map(|child| 1 + count(child.value()))
                .sum()
        }
        count(&self.root)
    }
}

impl fmt::Debug for CommandTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTrie")
            .field("commands", &self.registered.len())
            .field("case_sensitive", &self.case_sensitive)
            .field("separator", &self.separator)
            .finish()
    }
}

fn normalize_token(token: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        token.to_string()
    } else {
        token.to_lowercase()
    }
}

/// Lazy iterator returned by [`CommandTrie::iterate`].
pub struct TrieWalk<'t> {
    next_node: Option<Arc<TrieNode>>,
    depth: usize,
    tokens: &'t [String],
    case_sensitive: bool,
    pending: std::vec::IntoIter<Slot>,
    pending_depth: usize,
}

impl Iterator for TrieWalk<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            if let Some(slot) = self.pending.next() {
                return Some(Candidate {
                    depth: self.pending_depth,
                    sequence: slot.sequence,
                    command: slot.command,
                });
            }

            let node = self.next_node.take()?;
            self.pending = node.snapshot().into_iter();
            self.pending_depth = self.depth;

            if let Some(token) = self.tokens.get(self.depth) {
                let key = normalize_token(token, self.case_sensitive);
                self.next_node = node.children.get(&key).map(|entry| Arc::clone(entry.value()));
                self.depth += 1;
            }
        }
    }
}

impl fmt::Debug for TrieWalk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrieWalk")
            .field("depth", &self.depth)
            .field("tokens", &self.tokens)
            .finish()
    }
}

// MARK: --- UNIT TESTS ---

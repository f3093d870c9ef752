// src/core/cache.rs

use crate::{
    core::{
        parsers::Parser,
        preconditions::{ParameterPrecondition, Precondition},
    },
    models::{Command, CommandContext, CommandResult, Parameter, Value},
};
use log::trace;
use std::{collections::HashMap, fmt, future::Future, hash::Hash, sync::Arc};
use uuid::Uuid;

/// Reference identity of a shared plugin (precondition, parser...).
pub(crate) fn identity<T: ?Sized>(shared: &Arc<T>) -> usize {
    Arc::as_ptr(shared) as *const () as usize
}

/// A memo table. The first computation for a key is stored; later lookups
/// return a clone of it without running the computation again.
pub struct Memo<K, V> {
    entries: HashMap<K, V>,
    hits: usize,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
        }
    }
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    /// Returns the stored value for `key`, computing and storing it on a miss.
    pub async fn get_or_compute<F, Fut>(&mut self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.entries.get(&key) {
            self.hits += 1;
            return value.clone();
        }
        let value = compute().await;
        self.entries.insert(key, value.clone());
        value
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the table.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

impl<K, V> fmt::Debug for Memo<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits)
            .finish()
    }
}

/// Memoizes precondition checks and parses for the lifetime of one resolution.
///
/// The same command, parameter value or token slice can be visited several
/// times while the resolver scores candidates at different depths. Checks may
/// have side effects (rate limits, audit logs), so each distinct check runs at
/// most once per request. The cache is created by `Resolver::resolve_tokens`
/// and dropped when it returns.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    preconditions: Memo<(usize, Uuid), CommandResult>,
    parameter_checks: Memo<(usize, Value), CommandResult>,
    parses: Memo<(usize, Vec<String>), Result<Value, String>>,
}

impl ResolutionCache {
    /// Empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs (or recalls) a command-level precondition for `command`.
    pub async fn check_precondition(
        &mut self,
        precondition: &Arc<dyn Precondition>,
        ctx: &dyn CommandContext,
        command: &Command,
    ) -> CommandResult {
        let key = (identity(precondition), command.id());
        self.preconditions
            .get_or_compute(key, || {
                trace!("Checking precondition '{}' for '{}'", precondition.name(), command.display_name());
                precondition.check(ctx, command)
            })
            .await
    }

    /// Runs (or recalls) a parameter precondition for `value`.
    pub async fn check_parameter(
        &mut self,
        precondition: &Arc<dyn ParameterPrecondition>,
        ctx: &dyn CommandContext,
        parameter: &Parameter,
        value: &Value,
    ) -> CommandResult {
        let key = (identity(precondition), value.clone());
        self.parameter_checks
            .get_or_compute(key, || precondition.check(ctx, parameter, value))
            .await
    }

    /// Parses (or recalls the parse of) a token slice.
    pub async fn parse(
        &mut self,
        parser: &Arc<dyn Parser>,
        ctx: &dyn CommandContext,
        tokens: &[String],
    ) -> Result<Value, String> {
        let key = (identity(parser), tokens.to_vec());
        self.parses
            .get_or_compute(key, || parser.parse(ctx, tokens))
            .await
    }

    /// Total number of lookups answered without recomputation.
    pub fn hits(&self) -> usize {
        self.preconditions.hits() + self.parameter_checks.hits() + self.parses.hits()
    }
}

// MARK: --- UNIT TESTS ---

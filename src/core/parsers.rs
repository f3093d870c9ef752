// src/core/parsers.rs

//! # Argument Parser Gateway
//!
//! Maps value types to the parsers that produce them. The gateway is consulted
//! when a command is registered, so a parameter without a parser is rejected
//! up front instead of failing on every request.

use crate::{
    core::trie::RegistrationError,
    models::{ANY_CONTEXT, CommandContext, ContextType, Parameter, Value, ValueType},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{fmt, sync::Arc};

/// Converts a slice of input tokens into a typed [`Value`].
///
/// Implementations must be total: malformed input is an `Err` carrying a
/// human-readable message, never a panic.
#[async_trait]
pub trait Parser: Send + Sync {
    /// The context type this parser is able to run under.
    fn context_type(&self) -> &'static ContextType {
        &ANY_CONTEXT
    }

    /// Parses the tokens assigned to one parameter. `Err` carries a message for the user.
    async fn parse(&self, ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String>;
}

/// Registry of parsers keyed by value type.
#[derive(Default)]
pub struct ParserGateway {
    parsers: DashMap<ValueType, Arc<dyn Parser>>,
}

impl ParserGateway {
    /// A gateway without parsers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `parser` for values of type `T`, returning the parser it replaced.
    pub fn register<T: 'static>(&self, parser: impl Parser + 'static) -> Option<Arc<dyn Parser>> {
        self.register_for(ValueType::of::<T>(), Arc::new(parser))
    }

    /// Registers `parser` for an explicit value type.
    pub fn register_for(
        &self,
        value_type: ValueType,
        parser: Arc<dyn Parser>,
    ) -> Option<Arc<dyn Parser>> {
        log::debug!("Registering parser for '{}'", value_type.name());
        self.parsers.insert(value_type, parser)
    }

    /// Removes the parser of a value type, returning whether one was registered.
    pub fn unregister(&self, value_type: ValueType) -> Option<Arc<dyn Parser>> {
        self.parsers.remove(&value_type).map(|(_, parser)| parser)
    }

    /// True when a parser is registered for the value type.
    pub fn contains(&self, value_type: ValueType) -> bool {
        self.parsers.contains_key(&value_type)
    }

    /// Number of registered parsers.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// True when no parser is registered.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Finds the parser for a parameter: its override if it has one, otherwise
    /// the parser registered for its value type.
    pub fn resolve(&self, parameter: &Parameter) -> Result<Arc<dyn Parser>, RegistrationError> {
        if let Some(parser) = parameter.parser_override() {
            return Ok(Arc::clone(parser));
        }
        self.parsers
            .get(&parameter.value_type())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistrationError::UnregisteredParser {
                parameter: parameter.name().to_string(),
                type_name: parameter.value_type().name(),
            })
    }
}

impl fmt::Debug for ParserGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&'static str> = self.parsers.iter().map(|e| e.key().name()).collect();
        names.sort_unstable();
        f.debug_struct("ParserGateway").field("parsers", &names).finish()
    }
}

// MARK: --- UNIT TESTS ---

// src/models.rs

use crate::core::{
    parsers::Parser,
    preconditions::{ParameterPrecondition, PreconditionGroup},
    trie::RegistrationError,
};
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use std::{
    any::{Any, TypeId},
    fmt,
    future::Future,
    hash::{Hash, Hasher},
    sync::Arc,
};
use uuid::Uuid;

// --- CONTEXT TYPES ---

/// A node in the context type hierarchy.
///
/// Context types are declared as statics and compared by address, so a
/// hierarchy is just a chain of `parent` references ending at [`ANY_CONTEXT`]:
///
/// ```
/// use parley::models::{ANY_CONTEXT, ContextType};
///
/// static CHAT: ContextType = ContextType::derived("chat", &ANY_CONTEXT);
/// static DIRECT_MESSAGE: ContextType = ContextType::derived("direct-message", &CHAT);
///
/// assert!(DIRECT_MESSAGE.is_a(&CHAT));
/// assert!(!CHAT.is_a(&DIRECT_MESSAGE));
/// ```
#[derive(Debug)]
pub struct ContextType {
    name: &'static str,
    parent: Option<&'static ContextType>,
}

/// The root of every context type hierarchy.
pub static ANY_CONTEXT: ContextType = ContextType::root("any");

impl ContextType {
    /// Declares a context type without a parent.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declares a context type that specializes `parent`.
    pub const fn derived(name: &'static str, parent: &'static ContextType) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// Name of the context type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The parent type; `None` only for the root.
    pub fn parent(&self) -> Option<&'static ContextType> {
        self.parent
    }

    /// Returns `true` if `other` is this type or one of its ancestors.
    pub fn is_a(&self, other: &ContextType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if std::ptr::eq(ty, other) {
                return true;
            }
            current = ty.parent;
        }
        false
    }

    /// Two context types are compatible when they lie on the same lineage,
    /// i.e. one of them is an ancestor-or-self of the other.
    pub fn is_compatible_with(&self, other: &ContextType) -> bool {
        self.is_a(other) || other.is_a(self)
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The per-invocation state a command runs against (the user, channel,
/// terminal session...). The engine only needs its runtime type and a way to
/// dispose of it once execution is over.
#[async_trait]
pub trait CommandContext: Send + Sync {
    /// The runtime context type, checked against each command's declaration.
    fn context_type(&self) -> &'static ContextType;

    /// Gives command bodies access to the concrete context.
    fn as_any(&self) -> &dyn Any;

    /// Releases resources owned by the context. Called once, after execution
    /// and event publication.
    async fn finalize(&self) {}
}

// --- VALUES ---

/// A typed argument value produced by a parser or taken from a default.
#[derive(Clone)]
pub enum Value {
    /// The literal absent value. A parameter whose default is `Some(Value::Absent)`
    /// is optional and resolves to "nothing" when omitted.
    Absent,
    /// A parsed boolean.
    Bool(bool),
    /// A parsed integer.
    Int(i64),
    /// A parsed float.
    Float(f64),
    /// Text, one or more tokens joined.
    Text(String),
    /// Items of a parameter spanning several tokens.
    List(Vec<Value>),
    /// Any other parsed type. Compared and hashed by pointer identity.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps an arbitrary value.
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Value::Custom(Arc::new(value))
    }

    /// True for [`Value::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Downcasts a [`Value::Custom`] payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Custom(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Absent => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Custom(inner) => (Arc::as_ptr(inner) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => f.write_str("Absent"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Text(s) => write!(f, "Text({:?})", s),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(" "))
            }
            Value::Custom(_) => f.write_str("<custom>"),
        }
    }
}

/// The identity of a parameter's value type. Parsers are registered against it.
#[derive(Clone, Copy)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    /// The identity of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Name of the type, for messages.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl Hash for ValueType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueType({})", self.name)
    }
}

// --- PARAMETERS ---

/// How many input tokens a parameter consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// A fixed number of tokens. `Tokens(0)` marks a parameter synthesized
    /// from the context instead of the input.
    Tokens(usize),
    /// Every remaining token. Only valid for the last parameter.
    Remainder,
}

/// Declares one argument of a command.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    value_type: ValueType,
    default: Option<Value>,
    span: Span,
    parser: Option<Arc<dyn Parser>>,
    preconditions: Vec<Arc<dyn ParameterPrecondition>>,
}

impl Parameter {
    /// A single-token parameter of the given type.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
            span: Span::Tokens(1),
            parser: None,
            preconditions: Vec::new(),
        }
    }

    /// Shorthand for `Parameter::new(name, ValueType::of::<T>())`.
    pub fn of<T: 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::of::<T>())
    }

    /// Makes the parameter optional, falling back to `value`.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets how many tokens the parameter consumes.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Makes the parameter swallow every remaining token.
    pub fn remainder(self) -> Self {
        self.with_span(Span::Remainder)
    }

    /// Makes the parameter consume no input; its parser builds the value from the context.
    pub fn from_context(self) -> Self {
        self.with_span(Span::Tokens(0))
    }

    /// Bypasses the gateway lookup for this parameter.
    pub fn with_parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Adds a check run on every parsed or defaulted value.
    pub fn with_precondition(mut self, precondition: impl ParameterPrecondition + 'static) -> Self {
        self.preconditions.push(Arc::new(precondition));
        self
    }

    /// Name of the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the parsed value.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// The default value; `Some` makes the parameter optional.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Tokens the parameter consumes.
    pub fn span(&self) -> Span {
        self.span
    }

    /// A parser used instead of the gateway one.
    pub fn parser_override(&self) -> Option<&Arc<dyn Parser>> {
        self.parser.as_ref()
    }

    /// Checks run on the value.
    pub fn preconditions(&self) -> &[Arc<dyn ParameterPrecondition>] {
        &self.preconditions
    }

    /// Tokens this parameter needs at minimum; zero when it has a default.
    pub fn min_tokens(&self) -> usize {
        if self.default.is_some() {
            return 0;
        }
        match self.span {
            Span::Tokens(n) => n,
            Span::Remainder => 1,
        }
    }

    /// Tokens this parameter may take at most; `None` when unbounded.
    pub fn max_tokens(&self) -> Option<usize> {
        match self.span {
            Span::Tokens(n) => Some(n),
            Span::Remainder => None,
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("default", &self.default)
            .field("span", &self.span)
            .field("has_parser_override", &self.parser.is_some())
            .field("preconditions", &self.preconditions.len())
            .finish()
    }
}

// --- RESULTS ---

/// The success/failure payload carried by preconditions, parsers and command bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    success: bool,
    message: Option<String>,
}

impl CommandResult {
    /// A success without a message.
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// A success carrying `message`.
    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    /// A failure with a message for the user.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// True for a success.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

// --- COMMANDS ---

/// The invocable part of a command, built once at registration time.
pub type CommandBody = Arc<
    dyn Fn(Arc<dyn CommandContext>, Vec<Value>) -> BoxFuture<'static, anyhow::Result<CommandResult>>
        + Send
        + Sync,
>;

/// An immutable, registered command.
pub struct Command {
    id: Uuid,
    paths: Vec<Vec<String>>,
    parameters: Vec<Parameter>,
    context_type: &'static ContextType,
    priority: i32,
    min_length: usize,
    max_length: Option<usize>,
    preconditions: Vec<PreconditionGroup>,
    description: Option<String>,
    body: CommandBody,
}

impl Command {
    /// Starts a new command.
    pub fn builder() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Primary id. Two commands with the same id are the same command.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Every path the command can be invoked by, primary name first.
    pub fn paths(&self) -> &[Vec<String>] {
        &self.paths
    }

    /// The first path, joined with spaces. Used for logs and messages.
    pub fn display_name(&self) -> String {
        self.paths.first().map(|p| p.join(" ")).unwrap_or_default()
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The context type the command requires.
    pub fn context_type(&self) -> &'static ContextType {
        self.context_type
    }

    /// Added to the name score when ranking candidates.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Fewest argument tokens the command accepts.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Most argument tokens the command accepts; `None` when unbounded.
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Groups that must all pass before the command runs.
    pub fn preconditions(&self) -> &[PreconditionGroup] {
        &self.preconditions
    }

    /// One-line description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Runs the command body.
    pub fn invoke(
        &self,
        context: Arc<dyn CommandContext>,
        arguments: Vec<Value>,
    ) -> BoxFuture<'static, anyhow::Result<CommandResult>> {
        (self.body)(context, arguments)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("paths", &self.paths)
            .field("parameters", &self.parameters)
            .field("context_type", &self.context_type.name())
            .field("priority", &self.priority)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("precondition_groups", &self.preconditions.len())
            .finish()
    }
}

/// Mutable staging area for a [`Command`].
#[derive(Default)]
pub struct CommandBuilder {
    id: Option<Uuid>,
    paths: Vec<Vec<String>>,
    parameters: Vec<Parameter>,
    context_type: Option<&'static ContextType>,
    priority: i32,
    preconditions: Vec<PreconditionGroup>,
    description: Option<String>,
    body: Option<CommandBody>,
}

impl CommandBuilder {
    /// Adds a name path. Call it again to make the command reachable under aliases.
    pub fn path<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.push(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the generated primary id.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Appends a parameter.
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Sets the required context type.
    pub fn context(mut self, context_type: &'static ContextType) -> Self {
        self.context_type = Some(context_type);
        self
    }

    /// Sets the ranking priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a group that must pass.
    pub fn precondition_group(mut self, group: PreconditionGroup) -> Self {
        self.preconditions.push(group);
        self
    }

    /// Sets the one-line description shown by `--list`.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the command body.
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<dyn CommandContext>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CommandResult>> + Send + 'static,
    {
        self.body = Some(Arc::new(move |ctx, args| handler(ctx, args).boxed()));
        self
    }

    /// Freezes the command. Path tokens and parsers are checked later, when
    /// the command is added to a registry.
    ///
    /// # Errors
    /// `InvalidCommand` without a path or a handler, or when the parameter
    /// spans add up past `usize::MAX`.
    pub fn build(self) -> Result<Arc<Command>, RegistrationError> {
        if self.paths.is_empty() {
            return Err(RegistrationError::InvalidCommand {
                reason: "a command needs at least one path".to_string(),
            });
        }
        let name = self.paths.first().map(|p| p.join(" ")).unwrap_or_default();
        let body = self.body.ok_or_else(|| RegistrationError::InvalidCommand {
            reason: format!("command '{}' has no handler", name),
        })?;

        let too_long = || RegistrationError::InvalidCommand {
            reason: format!("the parameters of '{}' span more tokens than can be counted", name),
        };
        let min_length = self
            .parameters
            .iter()
            .try_fold(0usize, |acc, p| acc.checked_add(p.min_tokens()))
            .ok_or_else(too_long)?;
        // `None` from a remainder means unbounded; an overflow is an error.
        let mut max_length = Some(0usize);
        for parameter in &self.parameters {
            max_length = match (max_length, parameter.max_tokens()) {
                (Some(acc), Some(n)) => Some(acc.checked_add(n).ok_or_else(too_long)?),
                _ => None,
            };
        }

        Ok(Arc::new(Command {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            paths: self.paths,
            parameters: self.parameters,
            context_type: self.context_type.unwrap_or(&ANY_CONTEXT),
            priority: self.priority,
            min_length,
            max_length,
            preconditions: self.preconditions,
            description: self.description,
            body,
        }))
    }
}

impl fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("paths", &self.paths)
            .field("parameters", &self.parameters)
            .field("has_handler", &self.body.is_some())
            .finish()
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    static CHAT: ContextType = ContextType::derived("chat", &ANY_CONTEXT);
    static GUILD: ContextType = ContextType::derived("guild", &CHAT);
    static TERMINAL: ContextType = ContextType::derived("terminal", &ANY_CONTEXT);

    fn noop() -> CommandBuilder {
        Command::builder().handler(|_, _| async { Ok(CommandResult::success()) })
    }

    #[test]
    fn test_context_type_hierarchy() {
        assert!(GUILD.is_a(&CHAT));
        assert!(GUILD.is_a(&ANY_CONTEXT));
        assert!(!CHAT.is_a(&GUILD));
        assert!(GUILD.is_compatible_with(&CHAT));
        assert!(CHAT.is_compatible_with(&GUILD));
        assert!(!GUILD.is_compatible_with(&TERMINAL));
    }

    #[test]
    fn test_value_structural_identity() {
        let mut set = HashSet::new();
        set.insert(Value::Int(5));
        set.insert(Value::Int(5));
        set.insert(Value::Text("5".to_string()));
        set.insert(Value::Float(0.5));
        set.insert(Value::Float(0.5));
        assert_eq!(set.len(), 3);

        let shared = Value::custom(42u8);
        assert_eq!(shared, shared.clone());
        assert_ne!(shared, Value::custom(42u8));
        assert_eq!(shared.downcast_ref::<u8>(), Some(&42));
    }

    #[test]
    fn test_builder_computes_arity_bounds() {
        let command = noop()
            .path(["move"])
            .parameter(Parameter::of::<i64>("x"))
            .parameter(Parameter::of::<i64>("y"))
            .parameter(Parameter::of::<i64>("z").with_default(Value::Int(0)))
            .build()
            .unwrap();
        assert_eq!(command.min_length(), 2);
        assert_eq!(command.max_length(), Some(3));
        assert!(std::ptr::eq(command.context_type(), &ANY_CONTEXT));
    }

    #[test]
    fn test_builder_remainder_is_unbounded() {
        let command = noop()
            .path(["say"])
            .parameter(Parameter::of::<String>("text").remainder())
            .build()
            .unwrap();
        assert_eq!(command.min_length(), 1);
        assert_eq!(command.max_length(), None);
    }

    #[test]
    fn test_builder_rejects_missing_path_and_handler() {
        assert!(noop().build().is_err());
        assert!(Command::builder().path(["x"]).build().is_err());
    }

    #[test]
    fn test_builder_rejects_overflowing_spans() {
        let huge = || Parameter::of::<i64>("n").with_span(Span::Tokens(usize::MAX));
        let result = noop().path(["x"]).parameter(huge()).parameter(huge()).build();
        assert!(matches!(result, Err(RegistrationError::InvalidCommand { .. })));

        let optional = noop()
            .path(["x"])
            .parameter(huge().with_default(Value::Absent))
            .parameter(huge())
            .build();
        assert!(matches!(optional, Err(RegistrationError::InvalidCommand { .. })));

        // A remainder after a huge span is simply unbounded.
        let open = noop()
            .path(["x"])
            .parameter(huge().with_default(Value::Absent))
            .parameter(Parameter::of::<String>("rest").remainder())
            .build()
            .unwrap();
        assert_eq!(open.min_length(), 1);
        assert_eq!(open.max_length(), None);
    }

    #[test]
    fn test_builder_generates_distinct_ids() {
        let a = noop().path(["a"]).build().unwrap();
        let b = noop().path(["a"]).build().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.display_name(), "a");
    }
}

// src/core/test_support.rs

//! Fixtures shared by the unit tests of the engine modules.

use crate::{
    core::{
        parsers::{Parser, ParserGateway},
        preconditions::{ParameterPrecondition, Precondition},
    },
    models::{ANY_CONTEXT, Command, CommandBuilder, CommandContext, CommandResult, ContextType, Parameter, Value},
};
use async_trait::async_trait;
use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub static TEST_CONTEXT: ContextType = ContextType::derived("test", &ANY_CONTEXT);
pub static OTHER_CONTEXT: ContextType = ContextType::derived("other", &ANY_CONTEXT);

pub struct TestContext {
    context_type: &'static ContextType,
    finalized: Arc<AtomicBool>,
}

impl TestContext {
    pub fn new() -> Arc<dyn CommandContext> {
        Self::of(&TEST_CONTEXT)
    }

    pub fn of(context_type: &'static ContextType) -> Arc<dyn CommandContext> {
        Arc::new(Self {
            context_type,
            finalized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A context that reports when it is finalized.
    pub fn tracked() -> (Arc<dyn CommandContext>, Arc<AtomicBool>) {
        let finalized = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(Self {
            context_type: &TEST_CONTEXT,
            finalized: Arc::clone(&finalized),
        });
        (ctx, finalized)
    }
}

#[async_trait]
impl CommandContext for TestContext {
    fn context_type(&self) -> &'static ContextType {
        self.context_type
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn finalize(&self) {
        self.finalized.store(true, Ordering::SeqCst);
    }
}

/// Parses exactly one token as an `i64`.
pub struct IntParser;

#[async_trait]
impl Parser for IntParser {
    async fn parse(&self, _ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        match tokens {
            [token] => token
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not an integer.", token)),
            _ => Err(format!("Expected one token, got {}.", tokens.len())),
        }
    }
}

/// Joins its tokens with single spaces.
pub struct TextParser;

#[async_trait]
impl Parser for TextParser {
    async fn parse(&self, _ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        Ok(Value::Text(tokens.join(" ")))
    }
}

/// An integer parser that counts its invocations.
pub struct CountingParser {
    calls: Arc<AtomicUsize>,
}

impl CountingParser {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { calls: Arc::clone(&calls) }, calls)
    }
}

#[async_trait]
impl Parser for CountingParser {
    async fn parse(&self, ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        IntParser.parse(ctx, tokens).await
    }
}

/// A precondition with a fixed answer that counts its checks.
pub struct Flag {
    pass: bool,
    message: String,
    calls: Arc<AtomicUsize>,
}

impl Flag {
    pub fn new(pass: bool) -> (Self, Arc<AtomicUsize>) {
        Self::with_message(pass, "flag is down")
    }

    pub fn with_message(pass: bool, message: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let flag = Self {
            pass,
            message: message.to_string(),
            calls: Arc::clone(&calls),
        };
        (flag, calls)
    }
}

#[async_trait]
impl Precondition for Flag {
    async fn check(&self, _ctx: &dyn CommandContext, _command: &Command) -> CommandResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.pass {
            CommandResult::success()
        } else {
            CommandResult::failure(self.message.clone())
        }
    }
}

/// A passing precondition whose execution hooks can be made to fail.
pub struct FailingHooks {
    pub before: bool,
    pub after: bool,
}

#[async_trait]
impl Precondition for FailingHooks {
    async fn check(&self, _ctx: &dyn CommandContext, _command: &Command) -> CommandResult {
        CommandResult::success()
    }

    async fn before_execution(&self, _ctx: &dyn CommandContext, _command: &Command) -> anyhow::Result<()> {
        if self.before {
            anyhow::bail!("before hook failed");
        }
        Ok(())
    }

    async fn after_execution(
        &self,
        _ctx: &dyn CommandContext,
        _command: &Command,
        _result: &CommandResult,
    ) -> anyhow::Result<()> {
        if self.after {
            anyhow::bail!("after hook failed");
        }
        Ok(())
    }
}

/// A parameter check with a fixed answer that counts its invocations.
pub struct CountingParameterCheck {
    pass: bool,
    calls: Arc<AtomicUsize>,
}

impl CountingParameterCheck {
    pub fn new(pass: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { pass, calls: Arc::clone(&calls) }, calls)
    }
}

#[async_trait]
impl ParameterPrecondition for CountingParameterCheck {
    async fn check(&self, _ctx: &dyn CommandContext, parameter: &Parameter, _value: &Value) -> CommandResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.pass {
            CommandResult::success()
        } else {
            CommandResult::failure(format!("'{}' was rejected.", parameter.name()))
        }
    }
}

/// A gateway with `i64` and `String` parsers.
pub fn gateway() -> Arc<ParserGateway> {
    let gateway = ParserGateway::new();
    gateway.register::<i64>(IntParser);
    gateway.register::<String>(TextParser);
    Arc::new(gateway)
}

/// A command builder on `path` whose body succeeds with its arguments joined.
pub fn command(path: &[&str]) -> CommandBuilder {
    Command::builder()
        .path(path.iter().copied())
        .handler(|_, args: Vec<Value>| async move {
            let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
            Ok(CommandResult::success_with(rendered.join(",")))
        })
}

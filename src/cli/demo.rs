// src/cli/demo.rs

//! The console front-end: a context type for interactive sessions, the value
//! parsers it needs and a small set of commands to drive the engine with.

use crate::{
    core::{
        command_executor::ExecutedOutcome,
        dispatcher::CommandService,
        events::ExecutionListener,
        parsers::Parser,
        preconditions::{ParameterPrecondition, Precondition, PreconditionGroup},
        trie::RegistrationError,
    },
    models::{ANY_CONTEXT, Command, CommandContext, CommandResult, ContextType, Parameter, Value},
};
use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use colored::*;
use std::{any::Any, sync::Arc};
use uuid::Uuid;

/// Context type of an interactive console session.
pub static CONSOLE_CONTEXT: ContextType = ContextType::derived("console", &ANY_CONTEXT);
/// A console session with administrator rights.
pub static ADMIN_CONSOLE: ContextType = ContextType::derived("admin-console", &CONSOLE_CONTEXT);

// --- CONTEXT ---

/// One line typed into the console.
#[derive(Debug, Clone)]
pub struct ConsoleContext {
    user: String,
    admin: bool,
    line: u64,
}

impl ConsoleContext {
    /// A context for input line `line` typed by `user`.
    pub fn new(user: impl Into<String>, admin: bool, line: u64) -> Self {
        Self {
            user: user.into(),
            admin,
            line,
        }
    }

    /// Name of the user typing the commands.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether the session has administrator rights.
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// One-based number of the input line.
    pub fn line(&self) -> u64 {
        self.line
    }
}

#[async_trait]
impl CommandContext for ConsoleContext {
    fn context_type(&self) -> &'static ContextType {
        if self.admin { &ADMIN_CONSOLE } else { &CONSOLE_CONTEXT }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn finalize(&self) {
        log::trace!("Line {} finalized.", self.line);
    }
}

fn console(ctx: &dyn CommandContext) -> Option<&ConsoleContext> {
    ctx.as_any().downcast_ref::<ConsoleContext>()
}

/// Who typed a line, as produced by [`CallerParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Name of the user.
    pub name: String,
    /// Whether the user is an administrator.
    pub admin: bool,
}

// --- PARSERS ---

/// Parses one token as an `i64`.
pub struct IntParser;

#[async_trait]
impl Parser for IntParser {
    async fn parse(&self, _ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        let [token] = tokens else {
            return Err(format!("Expected a single number, got {} tokens.", tokens.len()));
        };
        token
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{}' is not a whole number.", token))
    }
}

/// Joins every token it receives, so it doubles as the remainder parser.
pub struct TextParser;

#[async_trait]
impl Parser for TextParser {
    async fn parse(&self, _ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        Ok(Value::Text(tokens.join(" ")))
    }
}

/// Accepts `true/false`, `yes/no`, `on/off` and `1/0`, in any case.
pub struct BoolParser;

#[async_trait]
impl Parser for BoolParser {
    async fn parse(&self, _ctx: &dyn CommandContext, tokens: &[String]) -> Result<Value, String> {
        let [token] = tokens else {
            return Err("Expected a single yes/no value.".to_string());
        };
        match token.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a yes/no value.", token)),
        }
    }
}

/// Builds a [`Caller`] from the console context without reading any input.
pub struct CallerParser;

#[async_trait]
impl Parser for CallerParser {
    fn context_type(&self) -> &'static ContextType {
        &CONSOLE_CONTEXT
    }

    async fn parse(&self, ctx: &dyn CommandContext, _tokens: &[String]) -> Result<Value, String> {
        let console = console(ctx).ok_or_else(|| "Not a console session.".to_string())?;
        Ok(Value::custom(Caller {
            name: console.user().to_string(),
            admin: console.is_admin(),
        }))
    }
}

// --- PRECONDITIONS ---

/// Lets only administrators through and logs what they run.
pub struct RequireAdmin;

#[async_trait]
impl Precondition for RequireAdmin {
    async fn check(&self, ctx: &dyn CommandContext, command: &Command) -> CommandResult {
        match console(ctx) {
            Some(console) if console.is_admin() => CommandResult::success(),
            _ => CommandResult::failure(format!(
                "Only administrators can run '{}'.",
                command.display_name()
            )),
        }
    }

    async fn after_execution(
        &self,
        ctx: &dyn CommandContext,
        command: &Command,
        result: &CommandResult,
    ) -> anyhow::Result<()> {
        let user = console(ctx).map(ConsoleContext::user).unwrap_or("?");
        log::info!(
            "Privileged command '{}' run by '{}' (success: {}).",
            command.display_name(),
            user,
            result.is_success()
        );
        Ok(())
    }
}

/// Accepts integers within `min..=max`.
pub struct InRange {
    /// Smallest accepted value.
    pub min: i64,
    /// Largest accepted value.
    pub max: i64,
}

#[async_trait]
impl ParameterPrecondition for InRange {
    async fn check(&self, _ctx: &dyn CommandContext, parameter: &Parameter, value: &Value) -> CommandResult {
        match value.as_int() {
            Some(n) if (self.min..=self.max).contains(&n) => CommandResult::success(),
            _ => CommandResult::failure(format!(
                "'{}' must be between {} and {}.",
                parameter.name(),
                self.min,
                self.max
            )),
        }
    }
}

// --- COMMANDS ---

fn int_at(args: &[Value], index: usize) -> anyhow::Result<i64> {
    args.get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| anyhow!("argument {} is not an integer", index))
}

async fn echo(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    Ok(CommandResult::success_with(int_at(&args, 0)?.to_string()))
}

async fn echo_colored(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    const PALETTE: [Color; 6] = [
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
    ];
    let n = int_at(&args, 0)?;
    let color = usize::try_from(n.rem_euclid(6))
        .ok()
        .and_then(|i| PALETTE.get(i))
        .copied()
        .unwrap_or(Color::White);
    Ok(CommandResult::success_with(n.to_string().color(color).to_string()))
}

async fn say(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let text = args.first().and_then(Value::as_text).unwrap_or_default();
    Ok(CommandResult::success_with(text))
}

async fn add(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let sum = int_at(&args, 0)?
        .checked_add(int_at(&args, 1)?)
        .context("the sum overflows")?;
    Ok(CommandResult::success_with(sum.to_string()))
}

async fn greet(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let name = args.first().and_then(Value::as_text).unwrap_or("world");
    Ok(CommandResult::success_with(format!("Hello, {}!", name)))
}

async fn whoami(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let caller = args
        .first()
        .and_then(|v| v.downcast_ref::<Caller>())
        .context("missing caller")?;
    let role = if caller.admin { "administrator" } else { "user" };
    Ok(CommandResult::success_with(format!("{} ({})", caller.name, role)))
}

async fn shutdown(ctx: Arc<dyn CommandContext>, _args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let user = console(ctx.as_ref()).map(ConsoleContext::user).unwrap_or("?");
    Ok(CommandResult::success_with(format!("Shutdown requested by {}.", user)))
}

async fn purge(_ctx: Arc<dyn CommandContext>, _args: Vec<Value>) -> anyhow::Result<CommandResult> {
    Ok(CommandResult::success_with("Caches purged."))
}

async fn roll(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let sides = u128::try_from(int_at(&args, 0)?)?;
    let face = Uuid::new_v4().as_u128() % sides + 1;
    Ok(CommandResult::success_with(face.to_string()))
}

async fn verbose(_ctx: Arc<dyn CommandContext>, args: Vec<Value>) -> anyhow::Result<CommandResult> {
    let on = args.first().and_then(Value::as_bool).unwrap_or_default();
    Ok(CommandResult::success_with(if on { "Verbose output on." } else { "Verbose output off." }))
}

/// Registers the console parsers and commands on `service`.
pub fn register_demo_commands(service: &CommandService) -> Result<(), RegistrationError> {
    let parsers = service.parsers();
    parsers.register::<i64>(IntParser);
    parsers.register::<String>(TextParser);
    parsers.register::<bool>(BoolParser);
    parsers.register::<Caller>(CallerParser);

    let commands = [
        Command::builder()
            .path(["echo"])
            .parameter(Parameter::of::<i64>("number"))
            .description("Prints a number.")
            .handler(echo)
            .build()?,
        Command::builder()
            .path(["echo", "colored"])
            .parameter(Parameter::of::<i64>("number"))
            .description("Prints a number in a color picked from its value.")
            .handler(echo_colored)
            .build()?,
        Command::builder()
            .path(["say"])
            .path(["print"])
            .parameter(Parameter::of::<String>("text").remainder())
            .description("Repeats the rest of the line.")
            .handler(say)
            .build()?,
        Command::builder()
            .path(["add"])
            .path(["sum"])
            .parameter(Parameter::of::<i64>("a"))
            .parameter(Parameter::of::<i64>("b"))
            .description("Adds two numbers.")
            .handler(add)
            .build()?,
        Command::builder()
            .path(["greet"])
            .parameter(Parameter::of::<String>("name").with_default(Value::Text("world".to_string())))
            .handler(greet)
            .build()?,
        Command::builder()
            .path(["whoami"])
            .context(&CONSOLE_CONTEXT)
            .parameter(Parameter::of::<Caller>("caller").from_context())
            .handler(whoami)
            .build()?,
        Command::builder()
            .path(["admin", "shutdown"])
            .context(&ADMIN_CONSOLE)
            .handler(shutdown)
            .build()?,
        Command::builder()
            .path(["purge"])
            .precondition_group(PreconditionGroup::all().with(RequireAdmin))
            .handler(purge)
            .build()?,
        Command::builder()
            .path(["roll"])
            .parameter(Parameter::of::<i64>("sides").with_precondition(InRange { min: 1, max: 100 }))
            .description("Rolls a die with the given number of sides.")
            .handler(roll)
            .build()?,
        Command::builder()
            .path(["verbose"])
            .parameter(Parameter::of::<bool>("enabled"))
            .handler(verbose)
            .build()?,
    ];

    for command in commands {
        service.add(command)?;
    }
    log::debug!("Registered {} demo command(s).", service.registry().len());
    Ok(())
}

// --- OUTPUT ---

/// Prints every published outcome to standard output.
pub struct PrintListener {
    json: bool,
}

impl PrintListener {
    /// Prints JSON lines when `json` is set, colored text otherwise.
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

#[async_trait]
impl ExecutionListener for PrintListener {
    fn name(&self) -> &str {
        "print"
    }

    async fn on_executed(&self, outcome: Arc<ExecutedOutcome>) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&outcome.summary())?);
            return Ok(());
        }

        let message = outcome.result.message().unwrap_or_default();
        if outcome.is_success() {
            println!("{}", message);
        } else {
            println!("{}: {}", "Failed".red().bold(), message);
        }
        if let Some(e) = &outcome.during_exception {
            println!("  {} {:#}", "cause:".yellow(), e);
        }
        for e in outcome.before_exceptions.iter().chain(&outcome.after_exceptions) {
            println!("  {} {:#}", "hook:".yellow(), e);
        }
        Ok(())
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{config::EngineConfig, resolver::Resolution, score::Stage};

    fn service() -> CommandService {
        let service = CommandService::new(EngineConfig::default());
        register_demo_commands(&service).unwrap();
        service
    }

    fn user() -> Arc<dyn CommandContext> {
        Arc::new(ConsoleContext::new("ada", false, 1))
    }

    fn admin() -> Arc<dyn CommandContext> {
        Arc::new(ConsoleContext::new("root", true, 1))
    }

    async fn run(service: &CommandService, ctx: Arc<dyn CommandContext>, input: &str) -> (Resolution, Option<String>) {
        let (resolution, outcome) = service.dispatch_and_wait(ctx, input).await;
        let message = outcome.and_then(|o| o.result.message().map(str::to_string));
        (resolution, message)
    }

    #[tokio::test]
    async fn test_registers_every_command() {
        assert_eq!(service().registry().len(), 10);
    }

    #[tokio::test]
    async fn test_echo_and_aliases() {
        let service = service();
        assert_eq!(run(&service, user(), "echo 5").await.1.as_deref(), Some("5"));
        assert_eq!(run(&service, user(), "sum 2 40").await.1.as_deref(), Some("42"));
        assert_eq!(
            run(&service, user(), "print \"hello there\" friend").await.1.as_deref(),
            Some("hello there friend")
        );
    }

    #[tokio::test]
    async fn test_echo_colored_is_the_longer_match() {
        let service = service();
        let (resolution, message) = run(&service, user(), "echo colored 7").await;
        assert_eq!(resolution.score().map(|s| s.score()), Some(2));
        assert!(message.unwrap().contains('7'));
    }

    #[tokio::test]
    async fn test_greet_default() {
        let service = service();
        assert_eq!(run(&service, user(), "greet").await.1.as_deref(), Some("Hello, world!"));
        assert_eq!(run(&service, user(), "greet Bob").await.1.as_deref(), Some("Hello, Bob!"));
    }

    #[tokio::test]
    async fn test_whoami_reads_context() {
        let service = service();
        assert_eq!(run(&service, user(), "whoami").await.1.as_deref(), Some("ada (user)"));
        assert_eq!(
            run(&service, admin(), "WHOAMI").await.1.as_deref(),
            Some("root (administrator)")
        );
    }

    #[tokio::test]
    async fn test_admin_commands() {
        let service = service();
        let (resolution, message) = run(&service, user(), "admin shutdown").await;
        assert_eq!(resolution.score().map(|s| s.stage()), Some(Stage::BadContext));
        assert!(message.is_none());
        assert_eq!(
            run(&service, admin(), "admin shutdown").await.1.as_deref(),
            Some("Shutdown requested by root.")
        );

        let (resolution, _) = run(&service, user(), "purge").await;
        assert_eq!(resolution.message(), "Only administrators can run 'purge'.");
        assert!(run(&service, admin(), "purge").await.0.is_success());
    }

    #[tokio::test]
    async fn test_roll_range() {
        let service = service();
        let (resolution, _) = run(&service, user(), "roll 0").await;
        assert_eq!(resolution.score().map(|s| s.stage()), Some(Stage::FailedParameterPrecondition));
        assert_eq!(resolution.message(), "'sides' must be between 1 and 100.");

        let face: i64 = run(&service, user(), "roll 6").await.1.unwrap().parse().unwrap();
        assert!((1..=6).contains(&face));
    }

    #[tokio::test]
    async fn test_bool_and_int_parse_errors() {
        let service = service();
        assert_eq!(
            run(&service, user(), "verbose ON").await.1.as_deref(),
            Some("Verbose output on.")
        );
        let (resolution, _) = run(&service, user(), "verbose maybe").await;
        assert_eq!(resolution.message(), "'maybe' is not a yes/no value.");
        let (resolution, _) = run(&service, user(), "add 1 two").await;
        assert_eq!(resolution.message(), "'two' is not a whole number.");
    }

    #[tokio::test]
    async fn test_overflow_is_an_execution_failure() {
        let service = service();
        let input = format!("add {} 1", i64::MAX);
        let (resolution, outcome) = service.dispatch_and_wait(user(), &input).await;
        assert!(resolution.is_success());
        let outcome = outcome.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.during_exception.is_some());
    }
}

// src/core/command_executor.rs

//! Runs a resolved command with its precondition hooks.
//!
//! Nothing raised by a hook or by the command body escapes [`CommandExecutor::execute`]:
//! errors and panics are recorded in the returned [`ExecutedOutcome`] so that
//! sibling hooks still run and the outcome can always be published.

use crate::models::{Command, CommandContext, CommandResult, Value};
use anyhow::anyhow;
use futures::FutureExt;
use log::{debug, warn};
use serde::Serialize;
use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};
use uuid::Uuid;

/// Result message substituted when the command body fails.
pub const EXECUTION_FAILURE_MESSAGE: &str = "An exception occurred during execution.";

/// Everything that happened while executing one command.
pub struct ExecutedOutcome {
    /// The command that ran.
    pub command: Arc<Command>,
    /// The context it ran in.
    pub context: Arc<dyn CommandContext>,
    /// Parsed arguments the body was called with.
    pub arguments: Vec<Value>,
    /// Failures of `before_execution` hooks, in hook order.
    pub before_exceptions: Vec<anyhow::Error>,
    /// What the body raised, if anything.
    pub during_exception: Option<anyhow::Error>,
    /// Failures of `after_execution` hooks, in hook order.
    pub after_exceptions: Vec<anyhow::Error>,
    /// The body result, or the generic failure when the body failed.
    pub result: CommandResult,
}

impl ExecutedOutcome {
    /// True when the body returned a successful result.
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// True if any hook or the body failed, even when the result is a success.
    pub fn has_exceptions(&self) -> bool {
        !self.before_exceptions.is_empty()
            || self.during_exception.is_some()
            || !self.after_exceptions.is_empty()
    }

    /// Renders the outcome for logs and JSON output.
    pub fn summary(&self) -> EventSummary {
        let render = |errors: &[anyhow::Error]| -> Vec<String> {
            errors.iter().map(|e| format!("{:#}", e)).collect()
        };
        EventSummary {
            command: self.command.display_name(),
            command_id: self.command.id(),
            context: self.context.context_type().name(),
            arguments: self.arguments.iter().map(ToString::to_string).collect(),
            success: self.result.is_success(),
            message: self.result.message().map(str::to_string),
            before_exceptions: render(&self.before_exceptions),
            during_exception: self.during_exception.as_ref().map(|e| format!("{:#}", e)),
            after_exceptions: render(&self.after_exceptions),
        }
    }
}

impl fmt::Debug for ExecutedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutedOutcome")
            .field("command", &self.command.display_name())
            .field("context", &self.context.context_type().name())
            .field("arguments", &self.arguments)
            .field("before_exceptions", &self.before_exceptions)
            .field("during_exception", &self.during_exception)
            .field("after_exceptions", &self.after_exceptions)
            .field("result", &self.result)
            .finish()
    }
}

/// A serializable projection of an [`ExecutedOutcome`] for logs and telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    /// Display name of the command.
    pub command: String,
    /// Primary id of the command.
    pub command_id: Uuid,
    /// Name of the runtime context type.
    pub context: &'static str,
    /// Arguments, rendered with `Display`.
    pub arguments: Vec<String>,
    /// Whether the result was a success.
    pub success: bool,
    /// Message of the result, if any.
    pub message: Option<String>,
    /// Rendered `before_execution` failures.
    pub before_exceptions: Vec<String>,
    /// Rendered body failure.
    pub during_exception: Option<String>,
    /// Rendered `after_execution` failures.
    pub after_exceptions: Vec<String>,
}

/// Executes resolved commands. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    /// Runs the `before` hooks, the body and the `after` hooks of `command`.
    pub async fn execute(
        ctx: Arc<dyn CommandContext>,
        command: Arc<Command>,
        arguments: Vec<Value>,
    ) -> ExecutedOutcome {
        debug!("Executing '{}'", command.display_name());
        let hooks: Vec<_> = command
            .preconditions()
            .iter()
            .flat_map(|group| group.leaves())
            .cloned()
            .collect();

        let mut before_exceptions = Vec::new();
        for hook in &hooks {
            if let Err(e) = catch_failure(hook.before_execution(ctx.as_ref(), &command)).await {
                warn!("Before-execution hook '{}' failed: {:#}", hook.name(), e);
                before_exceptions.push(e);
            }
        }

        let (result, during_exception) =
            match catch_failure(command.invoke(Arc::clone(&ctx), arguments.clone())).await {
                Ok(result) => (result, None),
                Err(e) => {
                    warn!("Command '{}' failed: {:#}", command.display_name(), e);
                    (CommandResult::failure(EXECUTION_FAILURE_MESSAGE), Some(e))
                }
            };

        let mut after_exceptions = Vec::new();
        for hook in &hooks {
            if let Err(e) = catch_failure(hook.after_execution(ctx.as_ref(), &command, &result)).await {
                warn!("After-execution hook '{}' failed: {:#}", hook.name(), e);
                after_exceptions.push(e);
            }
        }

        ExecutedOutcome {
            command,
            context: ctx,
            arguments,
            before_exceptions,
            during_exception,
            after_exceptions,
            result,
        }
    }
}

/// Awaits `future`, turning a panic into an error.
pub(crate) async fn catch_failure<T, F>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// MARK: --- UNIT TESTS ---

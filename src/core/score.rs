// src/core/score.rs

//! # Scorer
//!
//! A [`CommandScore`] records how far one candidate command got through the
//! resolution pipeline. Scores are comparable so the resolver can keep the
//! single most useful outcome: a working command always wins, and among
//! failures the one that progressed furthest (weighted by name specificity and
//! priority) is reported.

use crate::models::{Command, CommandResult, ContextType, Parameter, Value};
use std::{cmp::Ordering, fmt, sync::Arc};

/// The pipeline phase at which a candidate's evaluation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The runtime context does not satisfy the command's.
    BadContext,
    /// Too few or too many argument tokens.
    BadArgCount,
    /// A command precondition failed.
    FailedPrecondition,
    /// A parser rejected its tokens.
    FailedTypeReader,
    /// A parameter ran out of input and had no default.
    FailedOptionalArgs,
    /// A parameter check rejected a value.
    FailedParameterPrecondition,
    /// Every check passed.
    CanExecute,
}

impl Stage {
    /// Ranking weight. Later stages are "closer to working".
    pub const fn weight(self) -> f64 {
        match self {
            Stage::BadContext => 0.0,
            Stage::BadArgCount => 0.1,
            Stage::FailedPrecondition => 0.4,
            Stage::FailedTypeReader | Stage::FailedOptionalArgs => 0.5,
            Stage::FailedParameterPrecondition => 0.6,
            Stage::CanExecute => 1.0,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::BadContext => "invalid context",
            Stage::BadArgCount => "bad argument count",
            Stage::FailedPrecondition => "failed precondition",
            Stage::FailedTypeReader => "failed to parse argument",
            Stage::FailedOptionalArgs => "missing argument",
            Stage::FailedParameterPrecondition => "failed parameter precondition",
            Stage::CanExecute => "can execute",
        };
        f.write_str(label)
    }
}

/// The comparable outcome of scoring one candidate command.
#[derive(Debug, Clone)]
pub struct CommandScore {
    stage: Stage,
    score: usize,
    priority: i32,
    command: Option<Arc<Command>>,
    parameter: Option<usize>,
    arguments: Option<Vec<Value>>,
    result: CommandResult,
}

impl CommandScore {
    fn new(stage: Stage, command: &Arc<Command>, score: usize, result: CommandResult) -> Self {
        Self {
            stage,
            score,
            priority: command.priority(),
            command: Some(Arc::clone(command)),
            parameter: None,
            arguments: None,
            result,
        }
    }

    fn at_parameter(mut self, index: usize) -> Self {
        self.parameter = Some(index);
        self
    }

    /// Every check passed; `arguments` are ready to hand to the command body.
    pub fn can_execute(command: &Arc<Command>, score: usize, arguments: Vec<Value>) -> Self {
        let mut outcome = Self::new(Stage::CanExecute, command, score, CommandResult::success());
        outcome.arguments = Some(arguments);
        outcome
    }

    /// The runtime context is not a descendant of the command's.
    pub fn invalid_context(command: &Arc<Command>, score: usize, actual: &ContextType) -> Self {
        let message = format!(
            "Command '{}' cannot run in a '{}' context; it requires '{}'.",
            command.display_name(),
            actual,
            command.context_type()
        );
        Self::new(Stage::BadContext, command, score, CommandResult::failure(message))
    }

    /// Fewer argument tokens than the command requires.
    pub fn not_enough_args(command: &Arc<Command>, score: usize) -> Self {
        let message = format!(
            "Not enough arguments for '{}': expected at least {}.",
            command.display_name(),
            command.min_length()
        );
        Self::new(Stage::BadArgCount, command, score, CommandResult::failure(message))
    }

    /// More argument tokens than the command accepts.
    pub fn too_many_args(command: &Arc<Command>, score: usize) -> Self {
        let message = format!(
            "Too many arguments for '{}': expected at most {}.",
            command.display_name(),
            command.max_length().unwrap_or_default()
        );
        Self::new(Stage::BadArgCount, command, score, CommandResult::failure(message))
    }

    /// A command precondition group failed.
    pub fn failed_precondition(command: &Arc<Command>, score: usize, result: CommandResult) -> Self {
        Self::new(Stage::FailedPrecondition, command, score, result)
    }

    /// A parser rejected the tokens of parameter `parameter`.
    pub fn failed_type_reader(
        command: &Arc<Command>,
        score: usize,
        parameter: usize,
        result: CommandResult,
    ) -> Self {
        Self::new(Stage::FailedTypeReader, command, score, result).at_parameter(parameter)
    }

    /// The tokens could not be assigned to the optional parameters.
    pub fn failed_optional_args(command: &Arc<Command>, score: usize, parameter: usize) -> Self {
        let name = command
            .parameters()
            .get(parameter)
            .map(Parameter::name)
            .unwrap_or("?");
        let message = format!("Missing a value for parameter '{}'.", name);
        Self::new(Stage::FailedOptionalArgs, command, score, CommandResult::failure(message))
            .at_parameter(parameter)
    }

    /// A parameter check rejected the value of parameter `parameter`.
    pub fn failed_parameter_precondition(
        command: &Arc<Command>,
        score: usize,
        parameter: usize,
        result: CommandResult,
    ) -> Self {
        Self::new(Stage::FailedParameterPrecondition, command, score, result).at_parameter(parameter)
    }

    /// How far the candidate got.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of input tokens consumed as the command name.
    pub fn score(&self) -> usize {
        self.score
    }

    /// Name score plus command priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The scored command.
    pub fn command(&self) -> Option<&Arc<Command>> {
        self.command.as_ref()
    }

    /// Index of the parameter that failed, for parameter stages.
    pub fn parameter_index(&self) -> Option<usize> {
        self.parameter
    }

    /// The parameter that failed, for the parameter-level stages.
    pub fn parameter(&self) -> Option<&Parameter> {
        let command = self.command.as_ref()?;
        command.parameters().get(self.parameter?)
    }

    /// Parsed arguments, only at [`Stage::CanExecute`].
    pub fn arguments(&self) -> Option<&[Value]> {
        self.arguments.as_deref()
    }

    /// The failure message, or success.
    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    /// True at [`Stage::CanExecute`].
    pub fn is_success(&self) -> bool {
        self.stage == Stage::CanExecute
    }

    /// `weight × (score + priority)`.
    pub fn weighted(&self) -> f64 {
        self.stage.weight() * (self.score as f64 + f64::from(self.priority))
    }

    /// Splits a successful score into the command and its arguments.
    pub fn into_execution(self) -> Option<(Arc<Command>, Vec<Value>)> {
        if self.stage != Stage::CanExecute {
            return None;
        }
        Some((self.command?, self.arguments.unwrap_or_default()))
    }
}

/// Orders two optional outcomes.
///
/// 1. An absent outcome sorts below a present one.
/// 2. If exactly one side can execute, it is greater regardless of score.
/// 3. Otherwise the weighted scores decide.
pub fn compare(a: Option<&CommandScore>, b: Option<&CommandScore>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.is_success(), b.is_success()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            // Weighted scores are finite, so this never falls back.
            _ => a
                .weighted()
                .partial_cmp(&b.weighted())
                .unwrap_or(Ordering::Equal),
        },
    }
}

// MARK: --- UNIT TESTS ---

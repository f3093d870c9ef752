// src/core/resolver.rs

//! # Resolution Pipeline
//!
//! Turns a line of input into the single best [`CommandScore`].
//!
//! Every command whose name is a prefix of the input is a candidate. Each one
//! is scored independently (context, arity, preconditions, parameters) and the
//! running best is kept with [`score::compare`]. A failure in one candidate
//! never stops the others from being scored.

use crate::{
    core::{
        cache::ResolutionCache,
        config::AmbiguityPolicy,
        score::{self, CommandScore},
        tokenizer::Tokenizer,
        trie::CommandTrie,
    },
    models::{Command, CommandContext, CommandResult, Span, Value},
};
use log::{debug, trace};
use std::{cmp::Ordering, fmt, sync::Arc};

/// The outcome of resolving one line of input.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The input could not be tokenized.
    QuoteMismatch { message: String },
    /// No command name prefixes the input.
    CommandNotFound,
    /// Several different commands can execute and the policy forbids choosing.
    MultiMatch { commands: Vec<Arc<Command>> },
    /// The best candidate, successful or not.
    Scored(CommandScore),
}

impl Resolution {
    /// True when a command can execute.
    pub fn is_success(&self) -> bool {
        matches!(self, Resolution::Scored(score) if score.is_success())
    }

    /// A human-readable explanation of the outcome.
    pub fn message(&self) -> String {
        match self {
            Resolution::QuoteMismatch { message } => message.clone(),
            Resolution::CommandNotFound => "Unknown command.".to_string(),
            Resolution::MultiMatch { commands } => {
                let names: Vec<String> = commands.iter().map(|c| c.display_name()).collect();
                format!("Input is ambiguous between: {}.", names.join(", "))
            }
            Resolution::Scored(score) => score
                .result()
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| score.stage().to_string()),
        }
    }

    /// The winning score, if resolution got that far.
    pub fn score(&self) -> Option<&CommandScore> {
        match self {
            Resolution::Scored(score) => Some(score),
            _ => None,
        }
    }

    /// Takes the winning score.
    pub fn into_score(self) -> Option<CommandScore> {
        match self {
            Resolution::Scored(score) => Some(score),
            _ => None,
        }
    }
}

struct Best {
    score: CommandScore,
    sequence: u64,
}

/// Finds the best command for a line of input.
pub struct Resolver {
    trie: Arc<CommandTrie>,
    tokenizer: Arc<dyn Tokenizer>,
    policy: AmbiguityPolicy,
}

impl Resolver {
    /// A resolver over `trie` using `policy` for ties.
    pub fn new(trie: Arc<CommandTrie>, tokenizer: Arc<dyn Tokenizer>, policy: AmbiguityPolicy) -> Self {
        Self {
            trie,
            tokenizer,
            policy,
        }
    }

    /// The tie policy.
    pub fn policy(&self) -> AmbiguityPolicy {
        self.policy
    }

    /// Tokenizes `input` and resolves it.
    pub async fn resolve(&self, ctx: &dyn CommandContext, input: &str) -> Resolution {
        match self.tokenizer.split(input) {
            Ok(tokens) => self.resolve_tokens(ctx, &tokens).await,
            Err(e) => {
                debug!("Tokenizing '{}' failed: {}", input, e);
                Resolution::QuoteMismatch {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Scores every candidate for `tokens` and returns the best outcome.
    ///
    /// When two outcomes rank equally the command registered first is kept.
    pub async fn resolve_tokens(&self, ctx: &dyn CommandContext, tokens: &[String]) -> Resolution {
        if tokens.is_empty() {
            return Resolution::CommandNotFound;
        }

        let mut cache = ResolutionCache::new();
        let mut best: Option<Best> = None;

        for candidate in self.trie.iterate(tokens) {
            let outcome = self
                .score(ctx, &candidate.command, tokens, candidate.depth, &mut cache)
                .await;
            trace!(
                "Candidate '{}' at depth {}: {} (weighted {:.2})",
                candidate.command.display_name(),
                candidate.depth,
                outcome.stage(),
                outcome.weighted()
            );

            if let Some(current) = &best
                && self.policy == AmbiguityPolicy::Error
                && outcome.is_success()
                && current.score.is_success()
                && current.score.command().map(|c| c.id()) != Some(candidate.command.id())
            {
                let commands = current
                    .score
                    .command()
                    .into_iter()
                    .cloned()
                    .chain(std::iter::once(Arc::clone(&candidate.command)))
                    .collect();
                debug!("Ambiguous input, aborting resolution.");
                return Resolution::MultiMatch { commands };
            }

            let replace = match &best {
                None => true,
                Some(current) => match score::compare(Some(&outcome), Some(&current.score)) {
                    Ordering::Greater => true,
                    Ordering::Equal => candidate.sequence < current.sequence,
                    Ordering::Less => false,
                },
            };
            if replace {
                best = Some(Best {
                    score: outcome,
                    sequence: candidate.sequence,
                });
            }
        }

        trace!("Resolution cache answered {} lookup(s).", cache.hits());
        match best {
            Some(best) => Resolution::Scored(best.score),
            None => Resolution::CommandNotFound,
        }
    }

    /// Scores one candidate, treating `tokens[..start]` as its name.
    pub async fn score(
        &self,
        ctx: &dyn CommandContext,
        command: &Arc<Command>,
        tokens: &[String],
        start: usize,
        cache: &mut ResolutionCache,
    ) -> CommandScore {
        if !ctx.context_type().is_a(command.context_type()) {
            return CommandScore::invalid_context(command, start, ctx.context_type());
        }

        let remaining = tokens.len().saturating_sub(start);
        if remaining < command.min_length() {
            return CommandScore::not_enough_args(command, start);
        }
        if command.max_length().is_some_and(|max| remaining > max) {
            return CommandScore::too_many_args(command, start);
        }

        for group in command.preconditions() {
            let result = group.evaluate(ctx, command, cache).await;
            if !result.is_success() {
                return CommandScore::failed_precondition(command, start, result);
            }
        }

        let mut arguments = Vec::with_capacity(command.parameters().len());
        let mut cursor = start;
        for (index, parameter) in command.parameters().iter().enumerate() {
            let available = tokens.len().saturating_sub(cursor);
            let value = if available > 0 || parameter.span() == Span::Tokens(0) {
                let parser = match self.trie.gateway().resolve(parameter) {
                    Ok(parser) => parser,
                    Err(e) => {
                        return CommandScore::failed_type_reader(
                            command,
                            start,
                            index,
                            CommandResult::failure(e.to_string()),
                        );
                    }
                };
                let take = match parameter.span() {
                    Span::Tokens(n) => n.min(available),
                    Span::Remainder => available,
                };
                let slice = tokens.get(cursor..cursor + take).unwrap_or_default();
                cursor += take;
                match cache.parse(&parser, ctx, slice).await {
                    Ok(value) => value,
                    Err(message) => {
                        return CommandScore::failed_type_reader(
                            command,
                            start,
                            index,
                            CommandResult::failure(message),
                        );
                    }
                }
            } else if let Some(default) = parameter.default() {
                default.clone()
            } else {
                return CommandScore::failed_optional_args(command, start, index);
            };

            if let Some(failure) = check_parameter(ctx, command, index, &value, cache).await {
                return CommandScore::failed_parameter_precondition(command, start, index, failure);
            }
            arguments.push(value);
        }

        CommandScore::can_execute(command, start, arguments)
    }
}

async fn check_parameter(
    ctx: &dyn CommandContext,
    command: &Command,
    index: usize,
    value: &Value,
    cache: &mut ResolutionCache,
) -> Option<CommandResult> {
    let parameter = command.parameters().get(index)?;
    for precondition in parameter.preconditions() {
        let result = cache.check_parameter(precondition, ctx, parameter, value).await;
        if !result.is_success() {
            return Some(result);
        }
    }
    None
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("trie", &self.trie)
            .field("tokenizer", &self.tokenizer)
            .field("policy", &self.policy)
            .finish()
    }
}

// MARK: --- UNIT TESTS ---

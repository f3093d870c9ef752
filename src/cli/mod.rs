// src/cli/mod.rs

use crate::core::config::{AmbiguityPolicy, ConfigError, EngineConfig, TokenizerKind};
use clap::Parser;
use std::path::PathBuf;

/// Console context, parsers and demo commands.
pub mod demo;

/// parley: resolve and run text commands read from standard input.
///
/// Every line is tokenized, matched against the demo command registry and,
/// when a single best command is found, executed in the background. Results
/// are printed as they are published.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Engine configuration file. Defaults to `$PARLEY_CONFIG`, then
    /// `<config dir>/parley/parley.toml`.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the ambiguity policy.
    #[arg(long, value_enum)]
    pub policy: Option<AmbiguityPolicy>,

    /// Overrides the tokenizer.
    #[arg(long, value_enum)]
    pub tokenizer: Option<TokenizerKind>,

    /// Match command names case-sensitively.
    #[arg(long)]
    pub case_sensitive: bool,

    /// Number of background workers.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Print each outcome as a JSON line.
    #[arg(long)]
    pub json: bool,

    /// Run the session with administrator rights.
    #[arg(long)]
    pub admin: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,

    /// List the available commands and exit.
    #[arg(short, long)]
    pub list: bool,
}

impl Cli {
    /// Loads the configuration file and applies the command-line overrides.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load_from_path(path)?,
            None => EngineConfig::load_or_default()?,
        };
        if let Some(policy) = self.policy {
            config.ambiguity_policy = policy;
        }
        if let Some(tokenizer) = self.tokenizer {
            config.tokenizer = tokenizer;
        }
        if self.case_sensitive {
            config.case_sensitive = true;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

// MARK: --- UNIT TESTS ---

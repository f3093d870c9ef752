// src/bin/parley.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use parley::{
    cli::{
        Cli,
        demo::{ConsoleContext, PrintListener, register_demo_commands},
    },
    core::dispatcher::CommandService,
    system::queue::BackgroundQueue,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Reads commands from standard input until it is closed, then drains the
/// background queue and exits.
#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()).await {
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    let config = cli.engine_config()?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let workers = config.workers;
    let queue = Arc::new(BackgroundQueue::new());
    let service = CommandService::new(config).with_queue(Arc::clone(&queue));
    register_demo_commands(&service)?;

    if cli.list {
        print_commands(&service);
        return Ok(());
    }

    queue.start(workers)?;
    service.events().subscribe(Arc::new(PrintListener::new(cli.json)));

    let user = std::env::var("USER").unwrap_or_else(|_| "guest".to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let ctx = Arc::new(ConsoleContext::new(user.as_str(), cli.admin, line_number));
        let resolution = service.dispatch(ctx, &line).await?;
        if !resolution.is_success() {
            eprintln!("{}: {}", "Rejected".yellow().bold(), resolution.message());
        }
    }

    queue.wait_idle().await;
    let abandoned = queue.stop().await;
    if abandoned > 0 {
        log::warn!("{} queued command(s) were abandoned.", abandoned);
    }
    for failure in queue.take_failures() {
        eprintln!("{}: {:#}", "Worker failure".red(), failure);
    }
    Ok(())
}

fn print_commands(service: &CommandService) {
    let mut commands = service.registry().commands();
    commands.sort_by_key(|command| command.display_name());
    for command in commands {
        let names: Vec<String> = command.paths().iter().map(|path| path.join(" ")).collect();
        let usage: Vec<String> = command
            .parameters()
            .iter()
            .filter(|p| p.max_tokens() != Some(0))
            .map(|p| match (p.default().is_some(), p.max_tokens()) {
                (true, _) => format!("[{}]", p.name()),
                (false, None) => format!("<{}...>", p.name()),
                (false, Some(_)) => format!("<{}>", p.name()),
            })
            .collect();
        println!(
            "{} {}  {}",
            names.join(" | ").cyan().bold(),
            usage.join(" ").green(),
            command.description().unwrap_or_default()
        );
    }
}

// src/core/dispatcher.rs

//! # Command Service
//!
//! The entry point that wires the engine together: a parser gateway, the trie
//! registry, a resolver configured from [`EngineConfig`], the event hub and an
//! optional [`BackgroundQueue`].
//!
//! `dispatch` resolves inline and hands the execution of a successful match to
//! the background (the queue if one is attached, a spawned task otherwise), so
//! the caller only waits for resolution. The [`ExecutedOutcome`] is delivered
//! through the event hub.

use crate::{
    core::{
        command_executor::{CommandExecutor, ExecutedOutcome},
        config::EngineConfig,
        events::EventHub,
        parsers::ParserGateway,
        resolver::{Resolution, Resolver},
        trie::{CommandTrie, RegistrationError},
    },
    models::{Command, CommandContext, Value},
    system::queue::{BackgroundQueue, QueueError},
};
use anyhow::anyhow;
use log::{debug, warn};
use std::{fmt, sync::Arc};

/// Registry, resolver, executor and event hub behind one handle.
pub struct CommandService {
    config: EngineConfig,
    gateway: Arc<ParserGateway>,
    trie: Arc<CommandTrie>,
    resolver: Resolver,
    events: Arc<EventHub>,
    queue: Option<Arc<BackgroundQueue>>,
}

impl CommandService {
    /// An empty service configured from `config`. No parsers are registered.
    pub fn new(config: EngineConfig) -> Self {
        let gateway = Arc::new(ParserGateway::new());
        let trie = Arc::new(CommandTrie::new(
            Arc::clone(&gateway),
            config.case_sensitive,
            config.token_separator,
        ));
        let resolver = Resolver::new(
            Arc::clone(&trie),
            config.build_tokenizer(),
            config.ambiguity_policy,
        );
        Self {
            config,
            gateway,
            trie,
            resolver,
            events: Arc::new(EventHub::new()),
            queue: None,
        }
    }

    /// Runs executions on `queue` instead of spawning a task per command.
    pub fn with_queue(mut self, queue: Arc<BackgroundQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The settings the service was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The gateway consulted when commands are added.
    pub fn parsers(&self) -> &Arc<ParserGateway> {
        &self.gateway
    }

    /// The command registry.
    pub fn registry(&self) -> &Arc<CommandTrie> {
        &self.trie
    }

    /// The hub outcomes are published to.
    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// The background queue, when one is attached.
    pub fn queue(&self) -> Option<&Arc<BackgroundQueue>> {
        self.queue.as_ref()
    }

    /// Registers `command`. See [`CommandTrie::add`].
    pub fn add(&self, command: Arc<Command>) -> Result<usize, RegistrationError> {
        self.trie.add(command)
    }

    /// Unregisters `command`. See [`CommandTrie::remove`].
    pub fn remove(&self, command: &Command) -> usize {
        self.trie.remove(command)
    }

    /// Resolves `input` without executing anything.
    pub async fn resolve(&self, ctx: &dyn CommandContext, input: &str) -> Resolution {
        self.resolver.resolve(ctx, input).await
    }

    /// Resolves `input` and, on success, schedules the execution in the
    /// background. The context is finalized once the outcome is published.
    ///
    /// # Errors
    /// Returns the queue's error when a queue is attached and refuses the work.
    pub async fn dispatch(
        &self,
        ctx: Arc<dyn CommandContext>,
        input: &str,
    ) -> Result<Resolution, QueueError> {
        let resolution = self.resolver.resolve(ctx.as_ref(), input).await;
        let Some((command, arguments)) = execution_of(&resolution) else {
            debug!("Nothing to execute for '{}': {}", input, resolution.message());
            return Ok(resolution);
        };

        let events = Arc::clone(&self.events);
        match &self.queue {
            Some(queue) => queue.enqueue_fn(move || async move {
                let name = command.display_name();
                let failures = run_pipeline(events, ctx, command, arguments).await.1;
                match failures {
                    0 => Ok(()),
                    n => Err(anyhow!("{} listener(s) failed after executing '{}'", n, name)),
                }
            })?,
            None => {
                tokio::spawn(async move {
                    run_pipeline(events, ctx, command, arguments).await;
                });
            }
        }
        Ok(resolution)
    }

    /// Resolves and executes inline, returning the published outcome.
    pub async fn dispatch_and_wait(
        &self,
        ctx: Arc<dyn CommandContext>,
        input: &str,
    ) -> (Resolution, Option<Arc<ExecutedOutcome>>) {
        let resolution = self.resolver.resolve(ctx.as_ref(), input).await;
        let Some((command, arguments)) = execution_of(&resolution) else {
            return (resolution, None);
        };
        let (outcome, _) = run_pipeline(Arc::clone(&self.events), ctx, command, arguments).await;
        (resolution, Some(outcome))
    }
}

impl fmt::Debug for CommandService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandService")
            .field("config", &self.config)
            .field("gateway", &self.gateway)
            .field("trie", &self.trie)
            .field("events", &self.events)
            .field("queue", &self.queue)
            .finish()
    }
}

fn execution_of(resolution: &Resolution) -> Option<(Arc<Command>, Vec<Value>)> {
    resolution.score().cloned()?.into_execution()
}

/// Execute, publish, finalize. Returns the outcome and the number of listener failures.
async fn run_pipeline(
    events: Arc<EventHub>,
    ctx: Arc<dyn CommandContext>,
    command: Arc<Command>,
    arguments: Vec<Value>,
) -> (Arc<ExecutedOutcome>, usize) {
    let outcome = Arc::new(CommandExecutor::execute(Arc::clone(&ctx), command, arguments).await);
    let failures = match events.publish(Arc::clone(&outcome)).await {
        Some(failures) => {
            warn!(
                "{} listener(s) failed for '{}'.",
                failures.errors.len(),
                outcome.command.display_name()
            );
            failures.errors.len()
        }
        None => 0,
    };
    ctx.finalize().await;
    (outcome, failures)
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            config::AmbiguityPolicy,
            events::{ExecutionListener, FnListener},
            score::Stage,
            test_support::{IntParser, TestContext, TextParser, command},
        },
        models::Parameter,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn service(config: EngineConfig) -> CommandService {
        let service = CommandService::new(config);
        service.parsers().register::<i64>(IntParser);
        service.parsers().register::<String>(TextParser);
        service
    }

    fn echo_commands(service: &CommandService) -> (Arc<Command>, Arc<Command>) {
        let echo = command(&["echo"]).parameter(Parameter::of::<i64>("n")).build().unwrap();
        let colored = command(&["echo", "colored"])
            .parameter(Parameter::of::<i64>("n"))
            .handler(|_, args: Vec<Value>| async move {
                let n = args.first().and_then(Value::as_int).unwrap_or_default();
                Ok(crate::models::CommandResult::success_with(format!("colored {}", n)))
            })
            .build()
            .unwrap();
        service.add(Arc::clone(&echo)).unwrap();
        service.add(Arc::clone(&colored)).unwrap();
        (echo, colored)
    }

    #[tokio::test]
    async fn test_dispatch_and_wait_end_to_end() {
        let service = service(EngineConfig::default());
        let (_, colored) = echo_commands(&service);
        let (ctx, finalized) = TestContext::tracked();

        let (resolution, outcome) = service.dispatch_and_wait(ctx, "echo colored 5").await;
        let score = resolution.score().unwrap();
        assert_eq!(score.score(), 2);
        assert_eq!(score.command().map(|c| c.id()), Some(colored.id()));

        let outcome = outcome.unwrap();
        assert_eq!(outcome.arguments, vec![Value::Int(5)]);
        assert_eq!(outcome.result.message(), Some("colored 5"));
        assert!(finalized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_resolution_does_not_execute() {
        let service = service(EngineConfig::default());
        echo_commands(&service);
        let (ctx, finalized) = TestContext::tracked();

        let (resolution, outcome) = service.dispatch_and_wait(ctx, "echo colored x").await;
        assert!(outcome.is_none());
        assert_eq!(resolution.score().map(|s| s.stage()), Some(Stage::FailedTypeReader));
        assert!(!finalized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_publishes_from_spawned_task() {
        let service = service(EngineConfig::default());
        echo_commands(&service);
        let (tx, mut rx) = mpsc::unbounded_channel();
        service.events().subscribe(Arc::new(FnListener::new("forward", move |outcome: Arc<ExecutedOutcome>| {
            let tx = tx.clone();
            async move {
                tx.send(outcome.summary())?;
                Ok(())
            }
        })));

        let resolution = service.dispatch(TestContext::new(), "echo 9").await.unwrap();
        assert!(resolution.is_success());
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.command, "echo");
        assert_eq!(summary.arguments, vec!["9"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_through_queue() {
        let queue = Arc::new(BackgroundQueue::new());
        queue.start(2).unwrap();
        let service = service(EngineConfig::default()).with_queue(Arc::clone(&queue));
        echo_commands(&service);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        service.events().subscribe(Arc::new(FnListener::new("count", move |_outcome: Arc<ExecutedOutcome>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })));

        let mut contexts = Vec::new();
        for n in 0..10 {
            let (ctx, finalized) = TestContext::tracked();
            contexts.push(finalized);
            let input = format!("echo {}", n);
            assert!(service.dispatch(ctx, &input).await.unwrap().is_success());
        }
        queue.wait_idle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert!(contexts.iter().all(|f| f.load(Ordering::SeqCst)));
        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listener_failure_faults_queue() {
        let queue = Arc::new(BackgroundQueue::new());
        queue.start(1).unwrap();
        let service = service(EngineConfig::default()).with_queue(Arc::clone(&queue));
        echo_commands(&service);
        let failing: Arc<dyn ExecutionListener> = Arc::new(FnListener::new("broken", |_outcome: Arc<ExecutedOutcome>| async {
            Err::<(), _>(anyhow!("sink offline"))
        }));
        service.events().subscribe(failing);

        service.dispatch(TestContext::new(), "echo 1").await.unwrap();
        queue.wait_idle().await;
        assert!(matches!(
            service.dispatch(TestContext::new(), "echo 2").await,
            Err(QueueError::Faulted { .. })
        ));
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_config_drives_policy_and_case() {
        let config = EngineConfig {
            ambiguity_policy: AmbiguityPolicy::PreferBest,
            case_sensitive: true,
            ..EngineConfig::default()
        };
        let service = service(config);
        service.add(command(&["Ping"]).build().unwrap()).unwrap();
        service.add(command(&["Ping"]).priority(1).build().unwrap()).unwrap();
        let ctx = TestContext::new();

        assert!(service.resolve(ctx.as_ref(), "Ping").await.is_success());
        assert!(matches!(
            service.resolve(ctx.as_ref(), "ping").await,
            Resolution::CommandNotFound
        ));
    }

    #[tokio::test]
    async fn test_remove_unregisters() {
        let service = service(EngineConfig::default());
        let (echo, _) = echo_commands(&service);
        assert_eq!(service.remove(&echo), 1);
        let ctx = TestContext::new();
        let resolution = service.resolve(ctx.as_ref(), "echo 1").await;
        assert!(matches!(resolution, Resolution::CommandNotFound));
        assert_eq!(service.registry().len(), 1);
    }
}

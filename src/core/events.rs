// src/core/events.rs

//! Delivery of [`ExecutedOutcome`]s to listeners.
//!
//! Listeners run one after another in subscription order. A listener that
//! fails (or panics) does not prevent the next one from running; the failures
//! are gathered into a [`ListenerFailures`] event that is handed to the error
//! sinks and returned to the publisher.

use crate::core::command_executor::{ExecutedOutcome, catch_failure};
use async_trait::async_trait;
use log::{trace, warn};
use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

/// Observes every executed command.
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    /// Name reported with this listener's failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once per executed command, in subscription order.
    async fn on_executed(&self, outcome: Arc<ExecutedOutcome>) -> anyhow::Result<()>;
}

/// Receives the failures raised by listeners during one publication.
#[async_trait]
pub trait ListenerErrorSink: Send + Sync {
    /// Called once per publication that had at least one failing listener.
    async fn on_listener_failures(&self, failures: Arc<ListenerFailures>);
}

/// Every listener failure raised while publishing one outcome.
#[derive(Debug)]
pub struct ListenerFailures {
    /// The outcome the listeners were notified about.
    pub outcome: Arc<ExecutedOutcome>,
    /// `(listener name, error)` in the order the listeners ran.
    pub errors: Vec<(String, anyhow::Error)>,
}

/// Wraps an async closure as a listener.
pub struct FnListener<F> {
    name: String,
    callback: F,
}

impl<F, Fut> FnListener<F>
where
    F: Fn(Arc<ExecutedOutcome>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    /// A listener named `name` that calls `callback`.
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F, Fut> ExecutionListener for FnListener<F>
where
    F: Fn(Arc<ExecutedOutcome>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_executed(&self, outcome: Arc<ExecutedOutcome>) -> anyhow::Result<()> {
        (self.callback)(outcome).await
    }
}

/// Ordered listeners and error sinks for executed outcomes.
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<Arc<dyn ExecutionListener>>>,
    error_sinks: RwLock<Vec<Arc<dyn ListenerErrorSink>>>,
}

impl EventHub {
    /// A hub without listeners or sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener after the existing ones.
    pub fn subscribe(&self, listener: Arc<dyn ExecutionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Adds a sink for listener failures.
    pub fn subscribe_errors(&self, sink: Arc<dyn ListenerErrorSink>) {
        self.error_sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Number of subscribed listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers `outcome` to every listener. Returns the listener failures, if any.
    pub async fn publish(&self, outcome: Arc<ExecutedOutcome>) -> Option<Arc<ListenerFailures>> {
        // Snapshot so no lock is held across an await.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut errors = Vec::new();
        for listener in &listeners {
            trace!("Notifying listener '{}'", listener.name());
            if let Err(e) = catch_failure(listener.on_executed(Arc::clone(&outcome))).await {
                warn!("Listener '{}' failed: {:#}", listener.name(), e);
                errors.push((listener.name().to_string(), e));
            }
        }
        if errors.is_empty() {
            return None;
        }

        let failures = Arc::new(ListenerFailures { outcome, errors });
        let sinks = self
            .error_sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            sink.on_listener_failures(Arc::clone(&failures)).await;
        }
        Some(failures)
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks = self.error_sinks.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .field("error_sinks", &sinks)
            .finish()
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        command_executor::CommandExecutor,
        test_support::{TestContext, command},
    };
    use std::sync::Mutex;

    async fn outcome() -> Arc<ExecutedOutcome> {
        let cmd = command(&["x"]).build().unwrap();
        Arc::new(CommandExecutor::execute(TestContext::new(), cmd, Vec::new()).await)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str, fail: bool) -> Arc<dyn ExecutionListener> {
        let log = Arc::clone(log);
        let label = name.to_string();
        Arc::new(FnListener::new(name, move |_outcome| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().unwrap().push(label.clone());
                if fail {
                    anyhow::bail!("{} failed", label);
                }
                Ok(())
            }
        }))
    }

    struct CollectingSink(Mutex<Vec<usize>>);

    #[async_trait]
    impl ListenerErrorSink for CollectingSink {
        async fn on_listener_failures(&self, failures: Arc<ListenerFailures>) {
            self.0.lock().unwrap().push(failures.errors.len());
        }
    }

    #[tokio::test]
    async fn test_listeners_run_in_order() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            hub.subscribe(recorder(&log, name, false));
        }

        assert!(hub.publish(outcome().await).await.is_none());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_later_ones() {
        let hub = EventHub::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        hub.subscribe(recorder(&log, "a", true));
        hub.subscribe(recorder(&log, "b", false));
        hub.subscribe(recorder(&log, "c", true));
        hub.subscribe_errors(Arc::clone(&sink) as Arc<dyn ListenerErrorSink>);

        let failures = hub.publish(outcome().await).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let names: Vec<&str> = failures.errors.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(*sink.0.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_recorded() {
        let hub = EventHub::new();
        hub.subscribe(Arc::new(FnListener::new("panics", |outcome: Arc<ExecutedOutcome>| async move {
            if outcome.is_success() {
                panic!("listener exploded");
            }
            Ok(())
        })));

        let failures = hub.publish(outcome().await).await.unwrap();
        assert_eq!(failures.errors.len(), 1);
    }
}

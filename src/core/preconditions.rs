// src/core/preconditions.rs

//! Runtime checks attached to commands and parameters.
//!
//! Command-level checks are arranged in an explicit tree of
//! [`PreconditionGroup`]s. Each group combines its children with `And` (stop on
//! the first failure) or `Or` (stop on the first success). A command may carry
//! several groups; all of them must pass.

use crate::{
    core::cache::ResolutionCache,
    models::{Command, CommandContext, CommandResult, Parameter, Value},
};
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use std::{fmt, sync::Arc};

/// A command-scoped runtime check.
///
/// Besides the check itself, a precondition can observe the execution of the
/// command it guards through the `before_execution`/`after_execution` hooks.
/// Hook failures are collected by the executor and never stop other hooks.
#[async_trait]
pub trait Precondition: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Decides whether `command` may run under `ctx`.
    async fn check(&self, ctx: &dyn CommandContext, command: &Command) -> CommandResult;

    /// Runs right before the body. A failure is recorded but does not stop the body.
    async fn before_execution(
        &self,
        _ctx: &dyn CommandContext,
        _command: &Command,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after the body with its result.
    async fn after_execution(
        &self,
        _ctx: &dyn CommandContext,
        _command: &Command,
        _result: &CommandResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A parameter-scoped runtime check, run on each parsed (or defaulted) value.
#[async_trait]
pub trait ParameterPrecondition: Send + Sync {
    /// Decides whether `value` is acceptable for `parameter`.
    async fn check(
        &self,
        ctx: &dyn CommandContext,
        parameter: &Parameter,
        value: &Value,
    ) -> CommandResult;
}

/// How a group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupOp {
    /// Every child must pass.
    #[default]
    And,
    /// At least one child must pass.
    Or,
}

/// A child of a [`PreconditionGroup`].
#[derive(Clone)]
pub enum PreconditionNode {
    /// A single check.
    Leaf(Arc<dyn Precondition>),
    /// A nested group.
    Group(PreconditionGroup),
}

/// A tagged tree of command preconditions.
#[derive(Clone, Default)]
pub struct PreconditionGroup {
    op: GroupOp,
    children: Vec<PreconditionNode>,
}

impl PreconditionGroup {
    /// A group that passes only if every child passes.
    pub fn all() -> Self {
        Self {
            op: GroupOp::And,
            children: Vec::new(),
        }
    }

    /// A group that passes as soon as one child passes.
    pub fn any() -> Self {
        Self {
            op: GroupOp::Or,
            children: Vec::new(),
        }
    }

    /// Appends a leaf check.
    pub fn with(self, precondition: impl Precondition + 'static) -> Self {
        self.with_shared(Arc::new(precondition))
    }

    /// Adds a precondition that may also be used elsewhere. Shared instances
    /// are evaluated once per request.
    pub fn with_shared(mut self, precondition: Arc<dyn Precondition>) -> Self {
        self.children.push(PreconditionNode::Leaf(precondition));
        self
    }

    /// Appends a nested group.
    pub fn with_group(mut self, group: PreconditionGroup) -> Self {
        self.children.push(PreconditionNode::Group(group));
        self
    }

    /// How the children combine.
    pub fn op(&self) -> GroupOp {
        self.op
    }

    /// Leaves and nested groups, in order.
    pub fn children(&self) -> &[PreconditionNode] {
        &self.children
    }

    /// Every leaf precondition of the tree, depth first.
    pub fn leaves(&self) -> Vec<&Arc<dyn Precondition>> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Arc<dyn Precondition>>) {
        for child in &self.children {
            match child {
                PreconditionNode::Leaf(leaf) => out.push(leaf),
                PreconditionNode::Group(group) => group.collect_leaves(out),
            }
        }
    }

    /// Evaluates the tree. Leaf results are memoized in `cache`, so a
    /// precondition shared between candidates runs once per request.
    ///
    /// An empty group passes. A failing `Or` group reports its last failure.
    pub fn evaluate<'a>(
        &'a self,
        ctx: &'a dyn CommandContext,
        command: &'a Command,
        cache: &'a mut ResolutionCache,
    ) -> BoxFuture<'a, CommandResult> {
        async move {
            let mut last_failure = None;
            for child in &self.children {
                let result = match child {
                    PreconditionNode::Leaf(leaf) => cache.check_precondition(leaf, ctx, command).await,
                    PreconditionNode::Group(group) => group.evaluate(ctx, command, cache).await,
                };
                match (self.op, result.is_success()) {
                    (GroupOp::And, false) => return result,
                    (GroupOp::Or, true) => return result,
                    (GroupOp::Or, false) => last_failure = Some(result),
                    (GroupOp::And, true) => {}
                }
            }
            last_failure.unwrap_or_else(CommandResult::success)
        }
        .boxed()
    }
}

impl fmt::Debug for PreconditionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<String> = self
            .children
            .iter()
            .map(|child| match child {
                PreconditionNode::Leaf(leaf) => leaf.name().to_string(),
                PreconditionNode::Group(group) => format!("{:?}", group),
            })
            .collect();
        write!(f, "{:?}{:?}", self.op, children)
    }
}

impl fmt::Debug for PreconditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionNode::Leaf(leaf) => write!(f, "Leaf({})", leaf.name()),
            PreconditionNode::Group(group) => write!(f, "Group({:?})", group),
        }
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{Flag, TestContext, command};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_and_group_short_circuits_on_failure() {
        let (deny, deny_calls) = Flag::new(false);
        let (allow, allow_calls) = Flag::new(true);
        let group = PreconditionGroup::all().with(deny).with(allow);
        let cmd = command(&["x"]).build().unwrap();
        let ctx = TestContext::new();
        let mut cache = ResolutionCache::new();

        let result = group.evaluate(ctx.as_ref(), &cmd, &mut cache).await;
        assert!(!result.is_success());
        assert_eq!(deny_calls.load(Ordering::SeqCst), 1);
        assert_eq!(allow_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_or_group_short_circuits_on_success() {
        let (allow, allow_calls) = Flag::new(true);
        let (deny, deny_calls) = Flag::new(false);
        let group = PreconditionGroup::any().with(allow).with(deny);
        let cmd = command(&["x"]).build().unwrap();
        let ctx = TestContext::new();
        let mut cache = ResolutionCache::new();

        assert!(group.evaluate(ctx.as_ref(), &cmd, &mut cache).await.is_success());
        assert_eq!(allow_calls.load(Ordering::SeqCst), 1);
        assert_eq!(deny_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_or_group_reports_last_failure() {
        let (first, _) = Flag::new(false);
        let (second, _) = Flag::with_message(false, "second says no");
        let group = PreconditionGroup::any().with(first).with(second);
        let cmd = command(&["x"]).build().unwrap();
        let ctx = TestContext::new();
        let mut cache = ResolutionCache::new();

        let result = group.evaluate(ctx.as_ref(), &cmd, &mut cache).await;
        assert_eq!(result.message(), Some("second says no"));
    }

    #[tokio::test]
    async fn test_nested_groups() {
        // all(deny, any(...)) fails; any(deny, all(allow, allow)) passes.
        let (deny, _) = Flag::new(false);
        let (allow_a, _) = Flag::new(true);
        let (allow_b, _) = Flag::new(true);
        let group = PreconditionGroup::any()
            .with(deny)
            .with_group(PreconditionGroup::all().with(allow_a).with(allow_b));
        let cmd = command(&["x"]).build().unwrap();
        let ctx = TestContext::new();
        let mut cache = ResolutionCache::new();

        assert!(group.evaluate(ctx.as_ref(), &cmd, &mut cache).await.is_success());
        assert_eq!(group.leaves().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_group_passes() {
        let cmd = command(&["x"]).build().unwrap();
        let ctx = TestContext::new();
        let mut cache = ResolutionCache::new();
        assert!(PreconditionGroup::any().evaluate(ctx.as_ref(), &cmd, &mut cache).await.is_success());
    }
}

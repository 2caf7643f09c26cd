//! Type-erased view of everything a graph slot can hold.
//!
//! A slot is either blocking ([`SyncStep`]) or awaitable ([`AsyncStep`]).
//! Blocking flows only accept the former; async flows accept both, so a graph
//! can move from blocking to cooperative nodes one node at a time.
use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::action::resolve;
use crate::async_node::{AsyncBatchNode, AsyncNode};
use crate::batch::BatchNode;
use crate::context::RunCtx;
use crate::error::FlowResult;
use crate::flow::FlowCore;
use crate::node::{Node, NodeId};
use crate::retry::{retry_async, retry_blocking, RetryPolicy};

pub(crate) trait SyncStep<S>: Send + Sync {
    fn id(&self) -> NodeId;

    fn retry_policy(&self) -> RetryPolicy;

    /// Run the full lifecycle, returning the name of the selected action.
    fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>>;

    /// Traversal state of a nested flow
    fn flow_core(&self) -> Option<&FlowCore<S>> {
        None
    }
}

#[async_trait]
pub(crate) trait AsyncStep<S>: Send + Sync {
    fn id(&self) -> NodeId;

    fn retry_policy(&self) -> RetryPolicy;

    async fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>>;

    fn flow_core(&self) -> Option<&FlowCore<S>> {
        None
    }
}

pub(crate) enum Step<S> {
    Blocking(Box<dyn SyncStep<S>>),
    Awaitable(Box<dyn AsyncStep<S>>),
}

impl<S> Step<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn id(&self) -> NodeId {
        match self {
            Self::Blocking(step) => step.id(),
            Self::Awaitable(step) => step.id(),
        }
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Blocking(step) => step.retry_policy(),
            Self::Awaitable(step) => step.retry_policy(),
        }
    }

    pub(crate) fn flow_core(&self) -> Option<&FlowCore<S>> {
        match self {
            Self::Blocking(step) => step.flow_core(),
            Self::Awaitable(step) => step.flow_core(),
        }
    }

    pub(crate) fn is_awaitable(&self) -> bool {
        matches!(self, Self::Awaitable(_))
    }
}

/// How an async batch schedules its items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Concurrency {
    Sequential,
    Parallel,
}

pub(crate) struct NodeStep<N>(pub(crate) N);

impl<S, N> SyncStep<S> for NodeStep<N>
where
    N: Node<S>,
{
    fn id(&self) -> NodeId {
        self.0.id()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.0.retry_policy()
    }

    fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>> {
        let node = &self.0;
        let id = node.id();

        debug!(node_id = %id, "Starting prep phase");
        let prep = node.prep(ctx)?;

        debug!(node_id = %id, "Starting exec phase");
        let exec = retry_blocking(
            retry,
            &id,
            || node.exec(&prep),
            |err| node.exec_fallback(&prep, err),
        )?;

        debug!(node_id = %id, "Starting post phase");
        let action = node.post(ctx, prep, exec)?;
        Ok(resolve(action.as_ref()))
    }
}

pub(crate) struct BatchStep<N>(pub(crate) N);

impl<S, N> SyncStep<S> for BatchStep<N>
where
    N: BatchNode<S>,
{
    fn id(&self) -> NodeId {
        self.0.id()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.0.retry_policy()
    }

    fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>> {
        let node = &self.0;
        let id = node.id();

        let items = node.prep(ctx)?;
        debug!(node_id = %id, items = items.len(), "Processing batch");

        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            let output = retry_blocking(
                retry,
                &id,
                || node.exec(item),
                |err| node.exec_fallback(item, err),
            )?;
            outputs.push(output);
        }

        let action = node.post(ctx, items, outputs)?;
        Ok(resolve(action.as_ref()))
    }
}

pub(crate) struct AsyncNodeStep<N>(pub(crate) N);

#[async_trait]
impl<S, N> AsyncStep<S> for AsyncNodeStep<N>
where
    S: Send + Sync + 'static,
    N: AsyncNode<S>,
{
    fn id(&self) -> NodeId {
        self.0.id()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.0.retry_policy()
    }

    async fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>> {
        let node = &self.0;
        let id = node.id();

        debug!(node_id = %id, "Starting prep phase");
        let prep = node.prep(ctx).await?;

        debug!(node_id = %id, "Starting exec phase");
        let exec = retry_async(
            retry,
            &id,
            || node.exec(&prep),
            |err| node.exec_fallback(&prep, err),
        )
        .await?;

        debug!(node_id = %id, "Starting post phase");
        let action = node.post(ctx, prep, exec).await?;
        Ok(resolve(action.as_ref()))
    }
}

pub(crate) struct AsyncBatchStep<N> {
    pub(crate) node: N,
    pub(crate) concurrency: Concurrency,
}

#[async_trait]
impl<S, N> AsyncStep<S> for AsyncBatchStep<N>
where
    S: Send + Sync + 'static,
    N: AsyncBatchNode<S>,
{
    fn id(&self) -> NodeId {
        self.node.id()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.node.retry_policy()
    }

    async fn run(&self, ctx: RunCtx<'_, S>, retry: &RetryPolicy) -> FlowResult<Option<String>> {
        let node = &self.node;
        let id = node.id();

        let items = node.prep(ctx).await?;
        debug!(
            node_id = %id,
            items = items.len(),
            concurrency = ?self.concurrency,
            "Processing batch"
        );

        let outputs = match self.concurrency {
            Concurrency::Sequential => {
                let mut outputs = Vec::with_capacity(items.len());
                for item in &items {
                    let output = retry_async(
                        retry,
                        &id,
                        || node.exec(item),
                        |err| node.exec_fallback(item, err),
                    )
                    .await?;
                    outputs.push(output);
                }
                outputs
            }
            Concurrency::Parallel => {
                let id = id.as_str();
                let results = join_all(items.iter().map(|item| {
                    retry_async(
                        retry,
                        id,
                        move || node.exec(item),
                        move |err| node.exec_fallback(item, err),
                    )
                }))
                .await;
                results.into_iter().collect::<FlowResult<Vec<_>>>()?
            }
        };

        let action = node.post(ctx, items, outputs).await?;
        Ok(resolve(action.as_ref()))
    }
}

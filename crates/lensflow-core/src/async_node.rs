//! Cooperative counterparts of [`Node`](crate::Node) and
//! [`BatchNode`](crate::BatchNode).
//!
//! The lifecycle is identical; each phase is awaited, and so is the delay
//! between retry attempts. An async node can only be traversed by an
//! [`AsyncFlow`](crate::AsyncFlow) (or run directly with
//! [`NodeRef::run_async`](crate::NodeRef::run_async)).
use async_trait::async_trait;

use crate::action::ActionType;
use crate::context::RunCtx;
use crate::error::{FlowError, FlowResult};
use crate::node::{default_node_id, NodeId};
use crate::retry::RetryPolicy;
use crate::state::SharedState;

/// A node whose phases may suspend, e.g. while waiting on a network call.
#[async_trait]
pub trait AsyncNode<S = SharedState>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Output of the preparation phase
    type Prep: Send + Sync;
    /// Output of the execution phase
    type Exec: Send;
    /// Outcomes this node can route on
    type Action: ActionType;

    fn id(&self) -> NodeId {
        default_node_id::<Self>()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    async fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Self::Prep>;

    async fn exec(&self, prep: &Self::Prep) -> FlowResult<Self::Exec>;

    /// Called once after every attempt of `exec` failed. Re-raises by default.
    async fn exec_fallback(&self, prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        let _ = prep;
        Err(error)
    }

    async fn post(
        &self,
        ctx: RunCtx<'_, S>,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> FlowResult<Option<Self::Action>>;
}

/// An async node applying the same execution logic to every item of a
/// sequence.
///
/// The same trait backs both batch flavours; the graph decides how items are
/// scheduled:
/// - [`Graph::add_async_batch`](crate::Graph::add_async_batch) processes items
///   one after another, each item's retry loop finishing before the next item
///   starts;
/// - [`Graph::add_async_parallel_batch`](crate::Graph::add_async_parallel_batch)
///   launches every item at once and waits for all of them. A failing item
///   does not cut the others short; the first error in input order is
///   reported once every item has finished.
///
/// Results always come back in input order.
#[async_trait]
pub trait AsyncBatchNode<S = SharedState>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// One element of the prepared sequence
    type Item: Send + Sync;
    /// Result of processing one item
    type Output: Send;
    /// Outcomes this node can route on
    type Action: ActionType;

    fn id(&self) -> NodeId {
        default_node_id::<Self>()
    }

    /// Retry policy applied to each item's `exec`
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    async fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Self::Item>>;

    async fn exec(&self, item: &Self::Item) -> FlowResult<Self::Output>;

    /// Called once per item whose attempts all failed. Re-raises by default.
    async fn exec_fallback(&self, item: &Self::Item, error: FlowError) -> FlowResult<Self::Output> {
        let _ = item;
        Err(error)
    }

    async fn post(
        &self,
        ctx: RunCtx<'_, S>,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> FlowResult<Option<Self::Action>>;
}

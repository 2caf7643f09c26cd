use crate::action::ActionType;
use crate::context::RunCtx;
use crate::error::{FlowError, FlowResult};
use crate::node::{default_node_id, NodeId};
use crate::retry::RetryPolicy;
use crate::state::SharedState;

/// A blocking node that applies the same execution logic to every item of a
/// sequence.
///
/// `prep` yields the items, `exec` processes one item, and `post` receives
/// the items together with the results in input order. The node's retry
/// policy and fallback apply to each item separately. An empty sequence
/// yields an empty result list.
pub trait BatchNode<S = SharedState>: Send + Sync {
    /// One element of the prepared sequence
    type Item;
    /// Result of processing one item
    type Output;
    /// Outcomes this node can route on
    type Action: ActionType;

    fn id(&self) -> NodeId {
        default_node_id::<Self>()
    }

    /// Retry policy applied to each item's `exec`
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Self::Item>>;

    fn exec(&self, item: &Self::Item) -> FlowResult<Self::Output>;

    /// Called once per item whose attempts all failed. Re-raises by default.
    fn exec_fallback(&self, item: &Self::Item, error: FlowError) -> FlowResult<Self::Output> {
        let _ = item;
        Err(error)
    }

    fn post(
        &self,
        ctx: RunCtx<'_, S>,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> FlowResult<Option<Self::Action>>;
}

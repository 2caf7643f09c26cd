use crate::action::ActionType;
use crate::context::RunCtx;
use crate::error::{FlowError, FlowResult};
use crate::retry::RetryPolicy;
use crate::state::SharedState;

/// Identifier of a node, used in logs and to address nodes from configuration
pub type NodeId = String;

/// Short type name (`WriteChapters` rather than `my_crate::nodes::WriteChapters<T>`),
/// the default id of every node.
pub fn default_node_id<T: ?Sized>() -> NodeId {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// A blocking unit of work with a three-phase lifecycle.
///
/// 1. `prep` reads what it needs from the shared state and run parameters.
///    Errors here are never retried.
/// 2. `exec` does the work on the prepared input. The engine retries it
///    according to [`retry_policy`](Node::retry_policy) and hands the last
///    error to [`exec_fallback`](Node::exec_fallback) once every attempt failed.
/// 3. `post` writes results back and picks the next action. Errors here are
///    never retried.
///
/// Returning `None` from `post` selects the `"default"` edge.
///
/// ## Example
///
/// ```rust
/// use lensflow_core::{DefaultAction, FlowResult, Node, RunCtx};
///
/// struct Double;
///
/// impl Node for Double {
///     type Prep = i64;
///     type Exec = i64;
///     type Action = DefaultAction;
///
///     fn prep(&self, ctx: RunCtx<'_, lensflow_core::SharedState>) -> FlowResult<i64> {
///         ctx.require("input")
///     }
///
///     fn exec(&self, input: &i64) -> FlowResult<i64> {
///         Ok(input * 2)
///     }
///
///     fn post(
///         &self,
///         ctx: RunCtx<'_, lensflow_core::SharedState>,
///         _input: i64,
///         output: i64,
///     ) -> FlowResult<Option<DefaultAction>> {
///         ctx.insert("result", output)?;
///         Ok(None)
///     }
/// }
/// ```
pub trait Node<S = SharedState>: Send + Sync {
    /// Output of the preparation phase
    type Prep;
    /// Output of the execution phase
    type Exec;
    /// Outcomes this node can route on
    type Action: ActionType;

    /// Identifier used in logs and configuration
    fn id(&self) -> NodeId {
        default_node_id::<Self>()
    }

    /// Retry policy applied to `exec`. One attempt unless overridden.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Self::Prep>;

    fn exec(&self, prep: &Self::Prep) -> FlowResult<Self::Exec>;

    /// Called once after every attempt of `exec` failed, with the last error.
    ///
    /// Re-raises by default. Override it to turn a hard failure into an
    /// inspectable sentinel result.
    fn exec_fallback(&self, prep: &Self::Prep, error: FlowError) -> FlowResult<Self::Exec> {
        let _ = prep;
        Err(error)
    }

    fn post(
        &self,
        ctx: RunCtx<'_, S>,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> FlowResult<Option<Self::Action>>;
}

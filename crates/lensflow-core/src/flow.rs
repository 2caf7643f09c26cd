//! Blocking orchestration.
//!
//! A [`Flow`] walks a graph from its start node: run the current node, look
//! up the edge for the action it returned, continue with the target. The run
//! ends normally when the returned action has no edge.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::action::DEFAULT_ACTION;
use crate::config::FlowConfig;
use crate::context::RunCtx;
use crate::error::FlowResult;
use crate::graph::{GraphInner, NodeRef, Slot};
use crate::node::NodeId;
use crate::retry::RetryPolicy;
use crate::state::{Params, SharedState};
use crate::step::SyncStep;

/// Traversal state shared by every flow flavour
pub(crate) struct FlowCore<S> {
    pub(crate) id: NodeId,
    pub(crate) start: NodeRef<S>,
    pub(crate) params: Params,
    fallback_to_default: AtomicBool,
}

impl<S> FlowCore<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn new(id: impl Into<NodeId>, start: &NodeRef<S>) -> Self {
        Self {
            id: id.into(),
            start: start.clone(),
            params: Params::new(),
            fallback_to_default: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_fallback_to_default(&self, enabled: bool) {
        self.fallback_to_default.store(enabled, Ordering::Relaxed);
    }

    fn follows_default(&self) -> bool {
        self.fallback_to_default.load(Ordering::Relaxed)
    }

    /// Span tagging one run of this flow with a fresh run id
    pub(crate) fn span(&self) -> Span {
        info_span!("flow", flow_id = %self.id, run_id = %Uuid::new_v4())
    }

    /// Apply `config` to this flow and to every flow nested below it.
    ///
    /// Retry overrides reach every graph the traversal can enter; a graph
    /// shared by several flows is configured once.
    pub(crate) fn apply_config(&self, config: &FlowConfig) -> FlowResult<()> {
        config.validate()?;
        let mut graphs = Vec::new();
        let mut matched = BTreeSet::new();
        self.configure(config, &mut graphs, &mut matched)?;
        for id in config.nodes.keys().filter(|id| !matched.contains(*id)) {
            warn!(flow_id = %self.id, node_id = %id, "Retry override names no node reachable from this flow");
        }
        Ok(())
    }

    fn configure(
        &self,
        config: &FlowConfig,
        graphs: &mut Vec<Arc<GraphInner<S>>>,
        matched: &mut BTreeSet<String>,
    ) -> FlowResult<()> {
        self.set_fallback_to_default(config.fallback_to_default);
        let arena = self.start.arena();
        if graphs.iter().any(|seen| Arc::ptr_eq(seen, arena)) {
            return Ok(());
        }
        graphs.push(Arc::clone(arena));
        arena.apply_retry_overrides(config, matched)?;

        let slots = arena.all();
        for slot in &slots {
            if let Some(nested) = slot.nested_flow() {
                debug!(flow_id = %self.id, nested = %nested.id, "Configuring nested flow");
                nested.configure(config, graphs, matched)?;
            }
        }
        Ok(())
    }

    /// Index of the node reached from `slot` through `action`, if any.
    pub(crate) fn next_index(&self, slot: &Slot<S>, action: Option<&str>) -> Option<usize> {
        let action = action.unwrap_or(DEFAULT_ACTION);
        let (next, available) = slot.lookup(action);
        if next.is_some() {
            return next;
        }
        if available.is_empty() {
            debug!(node_id = %slot.id(), action = %action, "Node has no successors");
            return None;
        }
        if self.follows_default() && action != DEFAULT_ACTION {
            if let (Some(index), _) = slot.lookup(DEFAULT_ACTION) {
                warn!(
                    node_id = %slot.id(),
                    action = %action,
                    "No successor for action, following the default edge"
                );
                return Some(index);
            }
        }
        warn!(
            node_id = %slot.id(),
            action = %action,
            available = ?available,
            "Flow ends: no successor for action"
        );
        None
    }

    /// One traversal from the start node, returning the last action.
    pub(crate) fn orchestrate(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let arena = self.start.arena();
        let mut current = Some(self.start.index());
        let mut last_action = None;
        let mut steps = 0usize;

        info!(start_node = %self.start.id(), "Starting flow execution");
        while let Some(index) = current {
            let slot = arena.slot(index);
            debug!(node_id = %slot.id(), "Executing node");
            let action = slot.run_blocking(RunCtx::new(shared, params))?;
            steps += 1;
            current = self.next_index(&slot, action.as_deref());
            last_action = action;
        }
        info!(steps, last_action = ?last_action, "Flow execution completed");
        Ok(last_action)
    }

    /// Same traversal, awaiting asynchronous nodes.
    pub(crate) async fn orchestrate_async(
        &self,
        shared: &S,
        params: &Params,
    ) -> FlowResult<Option<String>> {
        let arena = self.start.arena();
        let mut current = Some(self.start.index());
        let mut last_action = None;
        let mut steps = 0usize;

        info!(start_node = %self.start.id(), "Starting flow execution");
        while let Some(index) = current {
            let slot = arena.slot(index);
            debug!(node_id = %slot.id(), "Executing node");
            let action = slot.run(RunCtx::new(shared, params)).await?;
            steps += 1;
            current = self.next_index(&slot, action.as_deref());
            last_action = action;
        }
        info!(steps, last_action = ?last_action, "Flow execution completed");
        Ok(last_action)
    }
}

impl<S> fmt::Debug for FlowCore<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCore")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("params", &self.params)
            .field("fallback_to_default", &self.follows_default())
            .finish()
    }
}

/// The prep/post phases of a flow used as a node.
///
/// Both are no-ops by default; `after` forwards the last action of the
/// traversal, which is what the enclosing flow routes on.
pub trait FlowHooks<S = SharedState>: Send + Sync {
    fn before(&self, ctx: RunCtx<'_, S>) -> FlowResult<()> {
        let _ = ctx;
        Ok(())
    }

    fn after(&self, ctx: RunCtx<'_, S>, last_action: Option<String>) -> FlowResult<Option<String>> {
        let _ = ctx;
        Ok(last_action)
    }
}

/// Blocking orchestrator over a graph.
///
/// A flow is itself usable as a node ([`Graph::add_flow`](crate::Graph::add_flow)),
/// so pipelines compose hierarchically. A nested flow runs with its own
/// parameters overlaid by those of the enclosing flow.
pub struct Flow<S = SharedState> {
    core: FlowCore<S>,
    hooks: Option<Box<dyn FlowHooks<S>>>,
}

impl<S> Flow<S>
where
    S: Send + Sync + 'static,
{
    /// Flow starting at `start`
    pub fn new(start: &NodeRef<S>) -> Self {
        Self {
            core: FlowCore::new("Flow", start),
            hooks: None,
        }
    }

    /// Identifier used in logs and when nested as a node
    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.core.id = id.into();
        self
    }

    /// Base parameters handed to every node of every run
    pub fn with_params(mut self, params: Params) -> Self {
        self.core.params = params;
        self
    }

    pub fn with_hooks(mut self, hooks: impl FlowHooks<S> + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    /// Follow the `"default"` edge when a returned action has no edge of its
    /// own, instead of ending the run.
    pub fn fallback_to_default(self, enabled: bool) -> Self {
        self.core.set_fallback_to_default(enabled);
        self
    }

    /// Apply `config`: per-node retry overrides plus the traversal flag, for
    /// this flow and every flow nested in it.
    pub fn with_config(self, config: &FlowConfig) -> FlowResult<Self> {
        self.core.apply_config(config)?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn params(&self) -> &Params {
        &self.core.params
    }

    pub fn start_node(&self) -> &NodeRef<S> {
        &self.core.start
    }

    /// Run the flow with its base parameters, returning the last action.
    pub fn run(&self, shared: &S) -> FlowResult<Option<String>> {
        self.execute(shared, &self.core.params)
    }

    /// Run the flow with `params` overlaid on its base parameters.
    pub fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let merged = self.core.params.merged(params);
        self.execute(shared, &merged)
    }

    fn execute(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let span = self.core.span();
        let _guard = span.enter();

        let ctx = RunCtx::new(shared, params);
        if let Some(hooks) = &self.hooks {
            hooks.before(ctx)?;
        }
        let last_action = self.core.orchestrate(shared, params)?;
        match &self.hooks {
            Some(hooks) => hooks.after(ctx, last_action),
            None => Ok(last_action),
        }
    }
}

impl<S> SyncStep<S> for Flow<S>
where
    S: Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.core.id.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn flow_core(&self) -> Option<&FlowCore<S>> {
        Some(&self.core)
    }

    fn run(&self, ctx: RunCtx<'_, S>, _retry: &RetryPolicy) -> FlowResult<Option<String>> {
        self.run_with_params(ctx.shared(), ctx.params())
    }
}

impl<S> fmt::Debug for Flow<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("core", &self.core)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Source of the parameter sets a batch flow iterates over.
///
/// Any `Fn(&S) -> FlowResult<Vec<Params>>` closure is a `BatchParams`.
pub trait BatchParams<S = SharedState>: Send + Sync {
    /// One parameter set per pass over the flow
    fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Params>>;

    /// Called once after every pass finished
    fn post(&self, ctx: RunCtx<'_, S>, param_sets: Vec<Params>) -> FlowResult<()> {
        let _ = (ctx, param_sets);
        Ok(())
    }
}

impl<S, F> BatchParams<S> for F
where
    F: Fn(&S) -> FlowResult<Vec<Params>> + Send + Sync,
{
    fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Params>> {
        self(ctx.shared())
    }
}

/// Runs the same flow once per parameter set, one pass after another.
///
/// Each pass sees the flow's parameters overlaid with its own set; nothing a
/// pass receives leaks into the next. The last action of each pass is
/// discarded, and a batch flow used as a node selects the default edge.
pub struct BatchFlow<S = SharedState> {
    core: FlowCore<S>,
    batch: Box<dyn BatchParams<S>>,
}

impl<S> BatchFlow<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(start: &NodeRef<S>, batch: impl BatchParams<S> + 'static) -> Self {
        Self {
            core: FlowCore::new("BatchFlow", start),
            batch: Box::new(batch),
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.core.id = id.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.core.params = params;
        self
    }

    pub fn fallback_to_default(self, enabled: bool) -> Self {
        self.core.set_fallback_to_default(enabled);
        self
    }

    pub fn with_config(self, config: &FlowConfig) -> FlowResult<Self> {
        self.core.apply_config(config)?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn params(&self) -> &Params {
        &self.core.params
    }

    pub fn run(&self, shared: &S) -> FlowResult<()> {
        self.execute(shared, &self.core.params)
    }

    pub fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let merged = self.core.params.merged(params);
        self.execute(shared, &merged)
    }

    fn execute(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let span = self.core.span();
        let _guard = span.enter();

        let ctx = RunCtx::new(shared, params);
        let param_sets = self.batch.prep(ctx)?;
        info!(passes = param_sets.len(), "Starting batch flow");
        for (pass, batch_params) in param_sets.iter().enumerate() {
            debug!(pass, "Starting batch pass");
            let merged = params.merged(batch_params);
            self.core.orchestrate(shared, &merged)?;
        }
        self.batch.post(ctx, param_sets)
    }
}

impl<S> SyncStep<S> for BatchFlow<S>
where
    S: Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.core.id.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn flow_core(&self) -> Option<&FlowCore<S>> {
        Some(&self.core)
    }

    fn run(&self, ctx: RunCtx<'_, S>, _retry: &RetryPolicy) -> FlowResult<Option<String>> {
        self.run_with_params(ctx.shared(), ctx.params())?;
        Ok(None)
    }
}

impl<S> fmt::Debug for BatchFlow<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFlow").field("core", &self.core).finish()
    }
}

//! Cooperative orchestration.
//!
//! Async flows traverse graphs holding any mix of blocking and async nodes:
//! async nodes are awaited, blocking ones are invoked in place on the calling
//! task. Nothing is spawned; parallel batch flows join their passes on the
//! task that runs them.
use std::fmt;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, Instrument};

use crate::config::FlowConfig;
use crate::context::RunCtx;
use crate::error::FlowResult;
use crate::flow::{BatchParams, FlowCore, FlowHooks};
use crate::graph::NodeRef;
use crate::node::NodeId;
use crate::retry::RetryPolicy;
use crate::state::{Params, SharedState};
use crate::step::AsyncStep;

/// Orchestrator that awaits async nodes.
pub struct AsyncFlow<S = SharedState> {
    core: FlowCore<S>,
    hooks: Option<Box<dyn FlowHooks<S>>>,
}

impl<S> AsyncFlow<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(start: &NodeRef<S>) -> Self {
        Self {
            core: FlowCore::new("AsyncFlow", start),
            hooks: None,
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

    pub fn with_hooks(mut self, hooks: impl FlowHooks<S> + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
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

    pub fn start_node(&self) -> &NodeRef<S> {
        &self.core.start
    }

    /// Run the flow with its base parameters, returning the last action.
    pub async fn run(&self, shared: &S) -> FlowResult<Option<String>> {
        self.execute(shared, &self.core.params).await
    }

    /// Run the flow with `params` overlaid on its base parameters.
    pub async fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let merged = self.core.params.merged(params);
        self.execute(shared, &merged).await
    }

    async fn execute(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let span = self.core.span();
        async {
            let ctx = RunCtx::new(shared, params);
            if let Some(hooks) = &self.hooks {
                hooks.before(ctx)?;
            }
            let last_action = self.core.orchestrate_async(shared, params).await?;
            match &self.hooks {
                Some(hooks) => hooks.after(ctx, last_action),
                None => Ok(last_action),
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<S> AsyncStep<S> for AsyncFlow<S>
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

    async fn run(&self, ctx: RunCtx<'_, S>, _retry: &RetryPolicy) -> FlowResult<Option<String>> {
        self.run_with_params(ctx.shared(), ctx.params()).await
    }
}

impl<S> fmt::Debug for AsyncFlow<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFlow")
            .field("core", &self.core)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Async source of the parameter sets an async batch flow iterates over.
///
/// Every [`BatchParams`] is also an `AsyncBatchParams`.
#[async_trait]
pub trait AsyncBatchParams<S = SharedState>: Send + Sync
where
    S: Send + Sync + 'static,
{
    async fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Params>>;

    async fn post(&self, ctx: RunCtx<'_, S>, param_sets: Vec<Params>) -> FlowResult<()> {
        let _ = (ctx, param_sets);
        Ok(())
    }
}

#[async_trait]
impl<S, B> AsyncBatchParams<S> for B
where
    S: Send + Sync + 'static,
    B: BatchParams<S>,
{
    async fn prep(&self, ctx: RunCtx<'_, S>) -> FlowResult<Vec<Params>> {
        BatchParams::prep(self, ctx)
    }

    async fn post(&self, ctx: RunCtx<'_, S>, param_sets: Vec<Params>) -> FlowResult<()> {
        BatchParams::post(self, ctx, param_sets)
    }
}

/// Parameter sets prepared for one batch run, each already overlaid on the
/// flow's parameters.
async fn prepare_passes<S>(
    batch: &dyn AsyncBatchParams<S>,
    ctx: RunCtx<'_, S>,
) -> FlowResult<(Vec<Params>, Vec<Params>)>
where
    S: Send + Sync + 'static,
{
    let param_sets = batch.prep(ctx).await?;
    let merged = param_sets
        .iter()
        .map(|batch_params| ctx.params().merged(batch_params))
        .collect();
    Ok((param_sets, merged))
}

/// Runs the same async flow once per parameter set, one pass after another.
pub struct AsyncBatchFlow<S = SharedState>
where
    S: Send + Sync + 'static,
{
    core: FlowCore<S>,
    batch: Box<dyn AsyncBatchParams<S>>,
}

impl<S> AsyncBatchFlow<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(start: &NodeRef<S>, batch: impl AsyncBatchParams<S> + 'static) -> Self {
        Self {
            core: FlowCore::new("AsyncBatchFlow", start),
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

    pub async fn run(&self, shared: &S) -> FlowResult<()> {
        self.execute(shared, &self.core.params).await
    }

    pub async fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let merged = self.core.params.merged(params);
        self.execute(shared, &merged).await
    }

    async fn execute(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let span = self.core.span();
        async {
            let ctx = RunCtx::new(shared, params);
            let (param_sets, passes) = prepare_passes(self.batch.as_ref(), ctx).await?;
            info!(passes = passes.len(), "Starting batch flow");
            for (pass, pass_params) in passes.iter().enumerate() {
                debug!(pass, "Starting batch pass");
                self.core.orchestrate_async(shared, pass_params).await?;
            }
            self.batch.post(ctx, param_sets).await
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<S> AsyncStep<S> for AsyncBatchFlow<S>
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

    async fn run(&self, ctx: RunCtx<'_, S>, _retry: &RetryPolicy) -> FlowResult<Option<String>> {
        self.run_with_params(ctx.shared(), ctx.params()).await?;
        Ok(None)
    }
}

impl<S> fmt::Debug for AsyncBatchFlow<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBatchFlow").field("core", &self.core).finish()
    }
}

/// Runs the same async flow once per parameter set, all passes concurrently.
///
/// Every pass runs to completion; the first error in parameter-set order is
/// reported afterwards. Passes share the state, so concurrent passes must
/// write disjoint keys.
pub struct AsyncParallelBatchFlow<S = SharedState>
where
    S: Send + Sync + 'static,
{
    core: FlowCore<S>,
    batch: Box<dyn AsyncBatchParams<S>>,
}

impl<S> AsyncParallelBatchFlow<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(start: &NodeRef<S>, batch: impl AsyncBatchParams<S> + 'static) -> Self {
        Self {
            core: FlowCore::new("AsyncParallelBatchFlow", start),
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

    pub async fn run(&self, shared: &S) -> FlowResult<()> {
        self.execute(shared, &self.core.params).await
    }

    pub async fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let merged = self.core.params.merged(params);
        self.execute(shared, &merged).await
    }

    async fn execute(&self, shared: &S, params: &Params) -> FlowResult<()> {
        let span = self.core.span();
        async {
            let ctx = RunCtx::new(shared, params);
            let (param_sets, passes) = prepare_passes(self.batch.as_ref(), ctx).await?;
            info!(passes = passes.len(), "Starting parallel batch flow");
            let results = join_all(
                passes
                    .iter()
                    .map(|pass_params| self.core.orchestrate_async(shared, pass_params)),
            )
            .await;
            for result in results {
                result?;
            }
            self.batch.post(ctx, param_sets).await
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<S> AsyncStep<S> for AsyncParallelBatchFlow<S>
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

    async fn run(&self, ctx: RunCtx<'_, S>, _retry: &RetryPolicy) -> FlowResult<Option<String>> {
        self.run_with_params(ctx.shared(), ctx.params()).await?;
        Ok(None)
    }
}

impl<S> fmt::Debug for AsyncParallelBatchFlow<S>
where
    S: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncParallelBatchFlow")
            .field("core", &self.core)
            .finish()
    }
}

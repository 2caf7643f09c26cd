//! Graph arena and node handles.
//!
//! A [`Graph`] owns every node as an immutable template. Adding a node returns
//! a [`NodeRef`], a cheap handle used to declare edges and to start flows.
//! Edges are stored by action name on the source slot; registering a second
//! edge for the same action replaces the first.
//!
//! The `>>` operator evaluates to its target so edges chain; as a statement
//! its value is discarded with `let _ =` (or use [`NodeRef::next`] directly).
//!
//! ```rust
//! # use lensflow_core::*;
//! # struct Fetch; struct Analyze; struct Report; struct Abort;
//! # macro_rules! noop { ($($t:ty),*) => { $(impl Node for $t {
//! #     type Prep = (); type Exec = (); type Action = DefaultAction;
//! #     fn prep(&self, _: RunCtx<'_, SharedState>) -> FlowResult<()> { Ok(()) }
//! #     fn exec(&self, _: &()) -> FlowResult<()> { Ok(()) }
//! #     fn post(&self, _: RunCtx<'_, SharedState>, _: (), _: ()) -> FlowResult<Option<DefaultAction>> { Ok(None) }
//! # })* } }
//! # noop!(Fetch, Analyze, Report, Abort);
//! let graph = Graph::new();
//! let fetch = graph.add(Fetch);
//! let analyze = graph.add(Analyze);
//! let report = graph.add(Report);
//! let abort = graph.add(Abort);
//!
//! let _ = &fetch >> &analyze >> &report;
//! let _ = &analyze - "abort" >> &abort;
//!
//! let flow = Flow::new(&fetch);
//! flow.run(&SharedState::new()).unwrap();
//! ```
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Shr, Sub};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::action::{ActionType, DEFAULT_ACTION};
use crate::async_flow::{AsyncBatchFlow, AsyncFlow, AsyncParallelBatchFlow};
use crate::async_node::{AsyncBatchNode, AsyncNode};
use crate::batch::BatchNode;
use crate::config::FlowConfig;
use crate::context::RunCtx;
use crate::error::{FlowError, FlowResult};
use crate::flow::{BatchFlow, Flow, FlowCore};
use crate::node::{Node, NodeId};
use crate::retry::RetryPolicy;
use crate::state::{Params, SharedState};
use crate::step::{
    AsyncBatchStep, AsyncNodeStep, BatchStep, Concurrency, NodeStep, Step,
};

/// One node template plus its outgoing edges
pub(crate) struct Slot<S> {
    id: NodeId,
    step: Step<S>,
    retry: RwLock<RetryPolicy>,
    successors: RwLock<HashMap<String, usize>>,
}

impl<S> Slot<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        *self.retry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.retry.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Successor for `action`, plus the sorted list of actions this slot does
    /// have edges for.
    pub(crate) fn lookup(&self, action: &str) -> (Option<usize>, Vec<String>) {
        let successors = self.successors.read().unwrap_or_else(PoisonError::into_inner);
        let mut available: Vec<String> = successors.keys().cloned().collect();
        available.sort();
        (successors.get(action).copied(), available)
    }

    /// Traversal state of the flow this slot nests, if it holds one
    pub(crate) fn nested_flow(&self) -> Option<&FlowCore<S>> {
        self.step.flow_core()
    }

    fn has_successors(&self) -> bool {
        !self
            .successors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Run this slot's lifecycle without suspending.
    pub(crate) fn run_blocking(&self, ctx: RunCtx<'_, S>) -> FlowResult<Option<String>> {
        match &self.step {
            Step::Blocking(step) => step.run(ctx, &self.retry_policy()),
            Step::Awaitable(_) => Err(FlowError::AsyncNodeInSyncFlow(self.id.clone())),
        }
    }

    /// Run this slot's lifecycle, awaiting it when it is asynchronous and
    /// invoking it in place when it is blocking.
    pub(crate) async fn run(&self, ctx: RunCtx<'_, S>) -> FlowResult<Option<String>> {
        let retry = self.retry_policy();
        match &self.step {
            Step::Blocking(step) => step.run(ctx, &retry),
            Step::Awaitable(step) => step.run(ctx, &retry).await,
        }
    }
}

pub(crate) struct GraphInner<S> {
    slots: RwLock<Vec<Arc<Slot<S>>>>,
}

impl<S> GraphInner<S> {
    /// Clone of the slot handle so no lock is held while the node runs
    pub(crate) fn slot(&self, index: usize) -> Arc<Slot<S>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slots[index])
    }

    pub(crate) fn all(&self) -> Vec<Arc<Slot<S>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<S> GraphInner<S>
where
    S: Send + Sync + 'static,
{
    /// Install the retry overrides of `config` on the nodes of this graph
    /// only, recording the ids that matched.
    pub(crate) fn apply_retry_overrides(
        &self,
        config: &FlowConfig,
        matched: &mut BTreeSet<String>,
    ) -> FlowResult<usize> {
        let slots = self.all();
        let mut updated = 0;
        for (id, retry) in &config.nodes {
            let policy = retry.to_policy()?;
            for slot in slots.iter().filter(|slot| &slot.id == id) {
                slot.set_retry_policy(policy);
                matched.insert(id.clone());
                updated += 1;
                debug!(node_id = %id, max_attempts = policy.max_attempts(), "Applied retry override");
            }
        }
        Ok(updated)
    }
}

/// Arena owning the nodes of one or more flows.
pub struct Graph<S = SharedState> {
    inner: Arc<GraphInner<S>>,
}

impl<S> Graph<S>
where
    S: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                slots: RwLock::new(Vec::new()),
            }),
        }
    }

    fn insert(&self, step: Step<S>) -> NodeRef<S> {
        let slot = Slot {
            id: step.id(),
            retry: RwLock::new(step.retry_policy()),
            step,
            successors: RwLock::new(HashMap::new()),
        };
        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        debug!(node_id = %slot.id, index = slots.len(), "Adding node to graph");
        slots.push(Arc::new(slot));
        NodeRef {
            graph: Arc::clone(&self.inner),
            index: slots.len() - 1,
        }
    }

    /// Add a blocking node
    pub fn add<N>(&self, node: N) -> NodeRef<S>
    where
        N: Node<S> + 'static,
    {
        self.insert(Step::Blocking(Box::new(NodeStep(node))))
    }

    /// Add a blocking batch node
    pub fn add_batch<N>(&self, node: N) -> NodeRef<S>
    where
        N: BatchNode<S> + 'static,
    {
        self.insert(Step::Blocking(Box::new(BatchStep(node))))
    }

    /// Add an async node
    pub fn add_async<N>(&self, node: N) -> NodeRef<S>
    where
        N: AsyncNode<S> + 'static,
    {
        self.insert(Step::Awaitable(Box::new(AsyncNodeStep(node))))
    }

    /// Add an async batch node whose items are processed one after another
    pub fn add_async_batch<N>(&self, node: N) -> NodeRef<S>
    where
        N: AsyncBatchNode<S> + 'static,
    {
        self.insert(Step::Awaitable(Box::new(AsyncBatchStep {
            node,
            concurrency: Concurrency::Sequential,
        })))
    }

    /// Add an async batch node whose items are all processed concurrently
    pub fn add_async_parallel_batch<N>(&self, node: N) -> NodeRef<S>
    where
        N: AsyncBatchNode<S> + 'static,
    {
        self.insert(Step::Awaitable(Box::new(AsyncBatchStep {
            node,
            concurrency: Concurrency::Parallel,
        })))
    }

    /// Nest a blocking flow as a node of this graph
    pub fn add_flow(&self, flow: Flow<S>) -> NodeRef<S> {
        self.insert(Step::Blocking(Box::new(flow)))
    }

    /// Nest a blocking batch flow as a node of this graph
    pub fn add_batch_flow(&self, flow: BatchFlow<S>) -> NodeRef<S> {
        self.insert(Step::Blocking(Box::new(flow)))
    }

    /// Nest an async flow as a node of this graph
    pub fn add_async_flow(&self, flow: AsyncFlow<S>) -> NodeRef<S> {
        self.insert(Step::Awaitable(Box::new(flow)))
    }

    /// Nest a sequential async batch flow as a node of this graph
    pub fn add_async_batch_flow(&self, flow: AsyncBatchFlow<S>) -> NodeRef<S> {
        self.insert(Step::Awaitable(Box::new(flow)))
    }

    /// Nest a parallel async batch flow as a node of this graph
    pub fn add_async_parallel_batch_flow(&self, flow: AsyncParallelBatchFlow<S>) -> NodeRef<S> {
        self.insert(Step::Awaitable(Box::new(flow)))
    }

    /// Number of nodes in the graph
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of every node in insertion order
    pub fn nodes(&self) -> Vec<NodeRef<S>> {
        (0..self.len())
            .map(|index| NodeRef {
                graph: Arc::clone(&self.inner),
                index,
            })
            .collect()
    }

    /// First node with the given id
    pub fn find(&self, id: &str) -> Option<NodeRef<S>> {
        self.inner
            .all()
            .iter()
            .position(|slot| slot.id == id)
            .map(|index| NodeRef {
                graph: Arc::clone(&self.inner),
                index,
            })
    }

    /// Install the per-node retry overrides of `config`.
    ///
    /// Every node of this graph whose id matches an entry gets that entry's
    /// policy. Flows nested in the graph are left alone; configure a flow with
    /// `with_config` to reach them too. Returns the number of nodes updated;
    /// entries matching no node are logged.
    pub fn apply_config(&self, config: &FlowConfig) -> FlowResult<usize> {
        config.validate()?;
        let mut matched = BTreeSet::new();
        let updated = self.inner.apply_retry_overrides(config, &mut matched)?;
        for id in config.nodes.keys().filter(|id| !matched.contains(*id)) {
            warn!(node_id = %id, "Retry override names no node in this graph");
        }
        Ok(updated)
    }
}

impl<S> Default for Graph<S>
where
    S: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for Graph<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<NodeId> = self.inner.all().iter().map(|slot| slot.id.clone()).collect();
        f.debug_struct("Graph").field("nodes", &ids).finish()
    }
}

/// Handle to a node inside a [`Graph`].
///
/// Handles compare equal when they point at the same graph slot.
pub struct NodeRef<S = SharedState> {
    graph: Arc<GraphInner<S>>,
    index: usize,
}

impl<S> NodeRef<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn arena(&self) -> &Arc<GraphInner<S>> {
        &self.graph
    }

    /// The graph this node belongs to
    pub fn graph(&self) -> Graph<S> {
        Graph {
            inner: Arc::clone(&self.graph),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn slot(&self) -> Arc<Slot<S>> {
        self.graph.slot(self.index)
    }

    pub fn id(&self) -> NodeId {
        self.slot().id.clone()
    }

    /// Whether this node has to be awaited
    pub fn is_async(&self) -> bool {
        self.slot().step.is_awaitable()
    }

    /// Register `other` as the successor for the `"default"` action.
    /// Returns `other` so chains read left to right.
    ///
    /// # Panics
    ///
    /// Panics if `other` belongs to a different graph.
    pub fn next(&self, other: &NodeRef<S>) -> NodeRef<S> {
        self.next_on(other, DEFAULT_ACTION)
    }

    /// Register `other` as the successor for `action`, replacing any previous
    /// successor for that action. Returns `other`.
    ///
    /// # Panics
    ///
    /// Panics if `other` belongs to a different graph.
    pub fn next_on(&self, other: &NodeRef<S>, action: impl ActionType) -> NodeRef<S> {
        assert!(
            Arc::ptr_eq(&self.graph, &other.graph),
            "cannot link nodes that belong to different graphs"
        );
        let slot = self.slot();
        let name = action.name().to_string();
        let mut successors = slot.successors.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = successors.insert(name.clone(), other.index) {
            warn!(
                node_id = %slot.id,
                action = %name,
                previous = previous,
                replacement = other.index,
                "Overwriting successor for action"
            );
        }
        other.clone()
    }

    /// Start a conditional edge: `node.on(action) >> &target`
    pub fn on(&self, action: impl ActionType) -> ConditionalTransition<S> {
        ConditionalTransition {
            source: self.clone(),
            action: action.name().to_string(),
        }
    }

    /// Node reached when this node returns `action`
    pub fn successor(&self, action: impl ActionType) -> Option<NodeRef<S>> {
        let (next, _) = self.slot().lookup(action.name());
        next.map(|index| NodeRef {
            graph: Arc::clone(&self.graph),
            index,
        })
    }

    /// Sorted names of the actions this node has edges for
    pub fn successor_actions(&self) -> Vec<String> {
        self.slot().lookup(DEFAULT_ACTION).1
    }

    pub fn has_successors(&self) -> bool {
        self.slot().has_successors()
    }

    /// Effective retry policy (the node's own unless overridden)
    pub fn retry_policy(&self) -> RetryPolicy {
        self.slot().retry_policy()
    }

    /// Override the node's retry policy
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.slot().set_retry_policy(policy);
    }

    fn warn_if_linked(&self, slot: &Slot<S>) {
        if slot.has_successors() {
            warn!(
                node_id = %slot.id,
                "Node has successors but is being run directly; successors will not run. Use a flow to traverse them"
            );
        }
    }

    /// Run this node's lifecycle once, outside any flow, returning the name of
    /// the action it selected. Async nodes fail with
    /// [`FlowError::AsyncNodeInSyncFlow`].
    pub fn run(&self, shared: &S) -> FlowResult<Option<String>> {
        self.run_with_params(shared, &Params::new())
    }

    pub fn run_with_params(&self, shared: &S, params: &Params) -> FlowResult<Option<String>> {
        let slot = self.slot();
        self.warn_if_linked(&slot);
        slot.run_blocking(RunCtx::new(shared, params))
    }

    /// Run this node's lifecycle once, outside any flow, awaiting it if needed
    pub async fn run_async(&self, shared: &S) -> FlowResult<Option<String>> {
        self.run_async_with_params(shared, &Params::new()).await
    }

    pub async fn run_async_with_params(
        &self,
        shared: &S,
        params: &Params,
    ) -> FlowResult<Option<String>> {
        let slot = self.slot();
        self.warn_if_linked(&slot);
        slot.run(RunCtx::new(shared, params)).await
    }
}

impl<S> Clone for NodeRef<S> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            index: self.index,
        }
    }
}

impl<S> PartialEq for NodeRef<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph) && self.index == other.index
    }
}

impl<S> Eq for NodeRef<S> {}

impl<S> fmt::Debug for NodeRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.graph.slot(self.index);
        f.debug_struct("NodeRef")
            .field("id", &slot.id)
            .field("index", &self.index)
            .finish()
    }
}

/// `&a >> &b`: default edge from `a` to `b`, evaluates to `b`
impl<S> Shr<&NodeRef<S>> for &NodeRef<S>
where
    S: Send + Sync + 'static,
{
    type Output = NodeRef<S>;

    fn shr(self, rhs: &NodeRef<S>) -> NodeRef<S> {
        self.next(rhs)
    }
}

/// Lets default edges chain: `&a >> &b >> &c`
impl<S> Shr<&NodeRef<S>> for NodeRef<S>
where
    S: Send + Sync + 'static,
{
    type Output = NodeRef<S>;

    fn shr(self, rhs: &NodeRef<S>) -> NodeRef<S> {
        self.next(rhs)
    }
}

/// `&a - action`: pending conditional edge, completed by `>> &b`
impl<S, A> Sub<A> for &NodeRef<S>
where
    S: Send + Sync + 'static,
    A: ActionType,
{
    type Output = ConditionalTransition<S>;

    fn sub(self, action: A) -> ConditionalTransition<S> {
        self.on(action)
    }
}

/// A source node with a pending action, waiting for its target.
#[must_use = "a conditional transition registers nothing until completed with `>>`"]
pub struct ConditionalTransition<S = SharedState> {
    source: NodeRef<S>,
    action: String,
}

impl<S> ConditionalTransition<S>
where
    S: Send + Sync + 'static,
{
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Register the edge and return the target
    pub fn to(self, target: &NodeRef<S>) -> NodeRef<S> {
        self.source.next_on(target, self.action)
    }
}

impl<S> Shr<&NodeRef<S>> for ConditionalTransition<S>
where
    S: Send + Sync + 'static,
{
    type Output = NodeRef<S>;

    fn shr(self, rhs: &NodeRef<S>) -> NodeRef<S> {
        self.to(rhs)
    }
}

impl<S> fmt::Debug for ConditionalTransition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalTransition")
            .field("source", &self.source)
            .field("action", &self.action)
            .finish()
    }
}

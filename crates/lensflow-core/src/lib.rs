//! Core engine of lensflow: nodes with a prep/exec/post lifecycle, graphs of
//! action-labelled edges, and flows that traverse them.
//!
//! Blocking pipelines use [`Node`], [`BatchNode`], [`Flow`] and [`BatchFlow`].
//! Their cooperative counterparts ([`AsyncNode`], [`AsyncBatchNode`],
//! [`AsyncFlow`], [`AsyncBatchFlow`], [`AsyncParallelBatchFlow`]) run on tokio
//! and can be mixed with blocking nodes inside an async flow.

pub mod action;
pub mod async_flow;
pub mod async_node;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod graph;
pub mod node;
pub mod retry;
pub mod state;
mod step;

pub use action::{ActionType, DefaultAction, DEFAULT_ACTION};
pub use async_flow::{AsyncBatchFlow, AsyncBatchParams, AsyncFlow, AsyncParallelBatchFlow};
pub use async_node::{AsyncBatchNode, AsyncNode};
pub use batch::BatchNode;
pub use config::{FlowConfig, RetryConfig};
pub use context::RunCtx;
pub use error::{FlowError, FlowResult};
pub use flow::{BatchFlow, BatchParams, Flow, FlowHooks};
pub use graph::{ConditionalTransition, Graph, NodeRef};
pub use node::{default_node_id, Node, NodeId};
pub use retry::RetryPolicy;
pub use state::{Params, SharedState};

// Re-export so node implementations don't need their own dependency
pub use async_trait::async_trait;

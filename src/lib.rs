//! # lensflow - a node/flow pipeline runtime
//!
//! Pipelines are graphs of nodes. Each node runs a three-phase lifecycle
//! (`prep`, `exec`, `post`): the engine retries `exec` according to the
//! node's [`RetryPolicy`], and `post` returns the action that selects the
//! next node. Flows traverse the graph until a node returns an action with no
//! edge.
//!
//! ```rust
//! use lensflow::prelude::*;
//!
//! struct Greet;
//!
//! impl Node for Greet {
//!     type Prep = String;
//!     type Exec = String;
//!     type Action = DefaultAction;
//!
//!     fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<String> {
//!         ctx.get_or("name", "world".to_string())
//!     }
//!
//!     fn exec(&self, name: &String) -> FlowResult<String> {
//!         Ok(format!("hello, {}", name))
//!     }
//!
//!     fn post(&self, ctx: RunCtx<'_, SharedState>, _: String, greeting: String) -> FlowResult<Option<DefaultAction>> {
//!         ctx.insert("greeting", greeting)?;
//!         Ok(None)
//!     }
//! }
//!
//! let graph = Graph::new();
//! let greet = graph.add(Greet);
//! let shared = SharedState::new();
//! Flow::new(&greet).run(&shared).unwrap();
//! assert_eq!(shared.require::<String>("greeting").unwrap(), "hello, world");
//! ```

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber printing to stderr.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. Calling this
/// more than once, or after another subscriber was installed, is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// Re-export the core crate
pub use lensflow_core as core;
pub use lensflow_core::*;

/// Everything needed to write nodes and assemble flows
pub mod prelude {
    pub use lensflow_core::{
        async_trait, ActionType, AsyncBatchFlow, AsyncBatchNode, AsyncBatchParams, AsyncFlow,
        AsyncNode, AsyncParallelBatchFlow, BatchFlow, BatchNode, BatchParams, DefaultAction,
        Flow, FlowConfig, FlowError, FlowHooks, FlowResult, Graph, Node, NodeRef, Params,
        RetryPolicy, RunCtx, SharedState,
    };
}

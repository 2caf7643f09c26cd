use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;

use crate::node::NodeId;

/// All possible errors that can occur while building or running a flow
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// Error raised by a node's lifecycle phase
    #[error("Node execution error: {0}")]
    NodeExecution(String),

    /// A required shared state key is absent or null
    #[error("Missing required key '{0}' in shared state")]
    MissingKey(String),

    /// A required run parameter is absent or null
    #[error("Missing required parameter '{0}'")]
    MissingParam(String),

    /// A stored value could not be read back as the requested type
    #[error("Type mismatch for '{key}': {message}")]
    TypeMismatch { key: String, message: String },

    /// A value could not be serialized into the shared state
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A blocking flow reached a node that must be awaited
    #[error("Node {0} is asynchronous and can only run inside an async flow")]
    AsyncNodeInSyncFlow(NodeId),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error produced by an external collaborator (LLM client, file system, ...)
    #[error("{0}")]
    External(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Other generic errors
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for lensflow operations
pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    /// Create a new node execution error
    pub fn node_execution(node_id: impl Display, message: impl Display) -> Self {
        Self::NodeExecution(format!("Node {}: {}", node_id, message))
    }

    /// Wrap an error coming from outside the engine, keeping it as the source
    pub fn external(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::External(Arc::new(error))
    }

    /// Create a generic error from a message
    pub fn other(message: impl Display) -> Self {
        Self::Other(message.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::external(err)
    }
}

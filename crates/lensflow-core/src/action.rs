use std::fmt::Debug;
use std::hash::Hash;

/// Name of the action used when a node returns no action, and of the edge
/// registered by `next` / `>>`.
pub const DEFAULT_ACTION: &str = "default";

/// Trait for action types that can be used for node transitions.
///
/// Nodes declare a closed set of outcomes (usually an enum) and the graph
/// stores edges by the outcome's [`name`](ActionType::name).
pub trait ActionType: Debug + Clone + PartialEq + Eq + Hash + Send + Sync + 'static {
    /// Get the name of this action
    fn name(&self) -> &str;
}

/// Action for nodes that only ever follow the default edge, or that pick an
/// edge by a name computed at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DefaultAction {
    /// Followed by `next` / `>>` edges
    #[default]
    Default,
    Named(String),
}

impl From<&str> for DefaultAction {
    fn from(name: &str) -> Self {
        if name == DEFAULT_ACTION {
            Self::Default
        } else {
            Self::Named(name.to_string())
        }
    }
}

impl ActionType for DefaultAction {
    fn name(&self) -> &str {
        match self {
            Self::Default => DEFAULT_ACTION,
            Self::Named(name) => name,
        }
    }
}

impl ActionType for String {
    fn name(&self) -> &str {
        self
    }
}

impl ActionType for &'static str {
    fn name(&self) -> &str {
        self
    }
}

/// Reduce an optional action to the edge key it selects.
pub(crate) fn resolve<A: ActionType>(action: Option<&A>) -> Option<String> {
    action.map(|a| a.name().to_string())
}

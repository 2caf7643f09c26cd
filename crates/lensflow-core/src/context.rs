use std::fmt;
use std::ops::Deref;

use crate::state::Params;

/// What a node sees during `prep` and `post`: the flow's shared state and the
/// parameters the flow assigned to this particular run.
///
/// Nodes themselves are immutable templates; everything that varies between
/// runs of the same graph arrives through this value. It dereferences to the
/// shared state, so `ctx.require::<T>("key")` works directly for
/// [`SharedState`](crate::SharedState).
pub struct RunCtx<'a, S> {
    shared: &'a S,
    params: &'a Params,
}

impl<'a, S> RunCtx<'a, S> {
    pub fn new(shared: &'a S, params: &'a Params) -> Self {
        Self { shared, params }
    }

    pub fn shared(&self) -> &'a S {
        self.shared
    }

    pub fn params(&self) -> &'a Params {
        self.params
    }
}

impl<S> Clone for RunCtx<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for RunCtx<'_, S> {}

impl<S> Deref for RunCtx<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.shared
    }
}

impl<S: fmt::Debug> fmt::Debug for RunCtx<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCtx")
            .field("shared", self.shared)
            .field("params", self.params)
            .finish()
    }
}

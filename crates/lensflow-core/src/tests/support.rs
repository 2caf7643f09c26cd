use crate::{FlowResult, Node, NodeId, RunCtx, SharedState};

/// Appends its name to `visited` and returns a fixed action.
pub(crate) struct Visit {
    name: String,
    action: Option<String>,
}

impl Visit {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: None,
        }
    }

    pub(crate) fn returning(name: &str, action: &str) -> Self {
        Self {
            name: name.to_string(),
            action: Some(action.to_string()),
        }
    }
}

impl Node for Visit {
    type Prep = ();
    type Exec = ();
    type Action = String;

    fn id(&self) -> NodeId {
        self.name.clone()
    }

    fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
        Ok(())
    }

    fn exec(&self, _prep: &()) -> FlowResult<()> {
        Ok(())
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (), _exec: ()) -> FlowResult<Option<String>> {
        ctx.push("visited", &self.name)?;
        Ok(self.action.clone())
    }
}

/// Appends the `x` parameter it was run with to `seen`.
#[derive(Default)]
pub(crate) struct Record;

impl Node for Record {
    type Prep = i64;
    type Exec = i64;
    type Action = String;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<i64> {
        ctx.params().require("x")
    }

    fn exec(&self, x: &i64) -> FlowResult<i64> {
        Ok(*x)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: i64, x: i64) -> FlowResult<Option<String>> {
        ctx.push("seen", x)?;
        Ok(None)
    }
}

pub(crate) fn visited(shared: &SharedState) -> Vec<String> {
    shared.get_or_default("visited").unwrap_or_default()
}

//! Fetch -> summarize -> report, with a flaky summarizer that succeeds on its
//! third attempt.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lensflow::prelude::*;

struct FetchFiles;

impl Node for FetchFiles {
    type Prep = String;
    type Exec = Vec<String>;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<String> {
        ctx.require("project")
    }

    fn exec(&self, project: &String) -> FlowResult<Vec<String>> {
        Ok(vec![
            format!("{}/src/lib.rs", project),
            format!("{}/src/flow.rs", project),
            format!("{}/src/node.rs", project),
        ])
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _project: String, files: Vec<String>) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("files", files)?;
        Ok(None)
    }
}

struct Summarize {
    attempts: AtomicUsize,
}

impl Node for Summarize {
    type Prep = Vec<String>;
    type Exec = String;
    type Action = DefaultAction;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(200))
    }

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<String>> {
        ctx.require("files")
    }

    fn exec(&self, files: &Vec<String>) -> FlowResult<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(FlowError::node_execution(
                "Summarize",
                format!("model overloaded (attempt {})", attempt),
            ));
        }
        Ok(format!("{} files, entry point {}", files.len(), files[0]))
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _files: Vec<String>, summary: String) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("summary", summary)?;
        Ok(None)
    }
}

struct Report;

impl Node for Report {
    type Prep = String;
    type Exec = String;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<String> {
        ctx.require("summary")
    }

    fn exec(&self, summary: &String) -> FlowResult<String> {
        Ok(format!("# Report\n\n{}\n", summary))
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _summary: String, report: String) -> FlowResult<Option<DefaultAction>> {
        println!("{}", report);
        ctx.insert("report", report)?;
        Ok(None)
    }
}

fn main() -> FlowResult<()> {
    lensflow::init();

    let graph = Graph::new();
    let fetch = graph.add(FetchFiles);
    let summarize = graph.add(Summarize {
        attempts: AtomicUsize::new(0),
    });
    let report = graph.add(Report);
    let _ = &fetch >> &summarize >> &report;

    let shared = SharedState::new();
    shared.insert("project", "lensflow")?;
    Flow::new(&fetch).with_id("LinearFlow").run(&shared)?;

    println!("final state keys: {:?}", shared.keys());
    Ok(())
}

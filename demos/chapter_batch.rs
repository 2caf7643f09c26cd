//! Async tutorial pipeline: identify chapters, write them concurrently, then
//! combine them. One chapter always fails; its fallback substitutes a
//! placeholder so the rest of the tutorial is still produced. Writing and
//! combining run once per language, all languages concurrently.
use std::time::Duration;

use lensflow::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chapter {
    number: usize,
    title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WrittenChapter {
    number: usize,
    body: String,
    failed: bool,
}

struct IdentifyChapters;

#[async_trait]
impl AsyncNode for IdentifyChapters {
    type Prep = Vec<String>;
    type Exec = Vec<Chapter>;
    type Action = DefaultAction;

    async fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<String>> {
        ctx.require("abstractions")
    }

    async fn exec(&self, abstractions: &Vec<String>) -> FlowResult<Vec<Chapter>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(abstractions
            .iter()
            .enumerate()
            .map(|(i, title)| Chapter {
                number: i + 1,
                title: title.clone(),
            })
            .collect())
    }

    async fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: Vec<String>, chapters: Vec<Chapter>) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("chapters", chapters)?;
        Ok(None)
    }
}

/// Chapter paired with the language it is written in
type ChapterJob = (Chapter, String);

struct WriteChapters;

#[async_trait]
impl AsyncBatchNode for WriteChapters {
    type Item = ChapterJob;
    type Output = WrittenChapter;
    type Action = DefaultAction;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(100))
    }

    async fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<ChapterJob>> {
        let chapters: Vec<Chapter> = ctx.require("chapters")?;
        let language: String = ctx.params().require("language")?;
        Ok(chapters
            .into_iter()
            .map(|chapter| (chapter, language.clone()))
            .collect())
    }

    async fn exec(&self, job: &ChapterJob) -> FlowResult<WrittenChapter> {
        let (chapter, language) = job;
        tokio::time::sleep(Duration::from_millis(100 * chapter.number as u64)).await;
        if chapter.title == "Retry" {
            return Err(FlowError::node_execution(
                "WriteChapters",
                format!("model refused chapter {}", chapter.number),
            ));
        }
        Ok(WrittenChapter {
            number: chapter.number,
            body: format!("[{}] Chapter {}: {}", language, chapter.number, chapter.title),
            failed: false,
        })
    }

    async fn exec_fallback(&self, job: &ChapterJob, error: FlowError) -> FlowResult<WrittenChapter> {
        let chapter = &job.0;
        Ok(WrittenChapter {
            number: chapter.number,
            body: format!("Chapter {} could not be generated: {}", chapter.number, error),
            failed: true,
        })
    }

    async fn post(&self, ctx: RunCtx<'_, SharedState>, _items: Vec<ChapterJob>, written: Vec<WrittenChapter>) -> FlowResult<Option<DefaultAction>> {
        let language: String = ctx.params().require("language")?;
        ctx.insert(format!("chapters_{}", language), written)?;
        Ok(None)
    }
}

struct Combine;

impl Node for Combine {
    type Prep = (String, Vec<WrittenChapter>);
    type Exec = String;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<(String, Vec<WrittenChapter>)> {
        let language: String = ctx.params().require("language")?;
        let written = ctx.require(&format!("chapters_{}", language))?;
        Ok((language, written))
    }

    fn exec(&self, (_language, written): &(String, Vec<WrittenChapter>)) -> FlowResult<String> {
        let failures = written.iter().filter(|chapter| chapter.failed).count();
        let mut tutorial = written
            .iter()
            .map(|chapter| chapter.body.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if failures > 0 {
            tutorial.push_str(&format!("\n({} chapter(s) missing)", failures));
        }
        Ok(tutorial)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, (language, _): (String, Vec<WrittenChapter>), tutorial: String) -> FlowResult<Option<DefaultAction>> {
        println!("--- {} ---\n{}\n", language, tutorial);
        ctx.insert(format!("tutorial_{}", language), tutorial)?;
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> FlowResult<()> {
    lensflow::init();

    let languages = |shared: &SharedState| -> FlowResult<Vec<Params>> {
        let languages: Vec<String> = shared.get_or("languages", vec!["english".to_string()])?;
        Ok(languages
            .into_iter()
            .map(|language| Params::new().with("language", language))
            .collect())
    };

    let per_language_graph = Graph::new();
    let write = per_language_graph.add_async_parallel_batch(WriteChapters);
    let combine = per_language_graph.add(Combine);
    let _ = &write >> &combine;
    let per_language = AsyncParallelBatchFlow::new(&write, languages).with_id("PerLanguage");

    let graph = Graph::new();
    let identify = graph.add_async(IdentifyChapters);
    let translate = graph.add_async_parallel_batch_flow(per_language);
    let _ = &identify >> &translate;
    let pipeline = AsyncFlow::new(&identify).with_id("Tutorials");

    let shared = SharedState::new();
    shared.insert("abstractions", vec!["Nodes", "Retry", "Flows"])?;
    shared.insert("languages", vec!["english", "french"])?;
    pipeline.run(&shared).await?;

    println!("state keys: {:?}", shared.keys());
    Ok(())
}

//! Draft -> review loop with a typed action enum. The reviewer asks for a
//! revision until the draft is long enough, then approves it.
use lensflow::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Review {
    Approve,
    Revise,
    Reject,
}

impl ActionType for Review {
    fn name(&self) -> &str {
        match self {
            Self::Approve => "approve",
            Self::Revise => "revise",
            Self::Reject => "reject",
        }
    }
}

struct Draft;

impl Node for Draft {
    type Prep = Vec<String>;
    type Exec = Vec<String>;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<String>> {
        ctx.get_or_default("paragraphs")
    }

    fn exec(&self, paragraphs: &Vec<String>) -> FlowResult<Vec<String>> {
        let mut next = paragraphs.clone();
        next.push(format!("Paragraph {}", paragraphs.len() + 1));
        Ok(next)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: Vec<String>, paragraphs: Vec<String>) -> FlowResult<Option<DefaultAction>> {
        println!("draft now has {} paragraphs", paragraphs.len());
        ctx.insert("paragraphs", paragraphs)?;
        Ok(None)
    }
}

struct Reviewer;

impl Node for Reviewer {
    type Prep = (usize, usize);
    type Exec = Review;
    type Action = Review;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<(usize, usize)> {
        let paragraphs: Vec<String> = ctx.require("paragraphs")?;
        let target = ctx.params().get_or("target_paragraphs", 3)?;
        Ok((paragraphs.len(), target))
    }

    fn exec(&self, (length, target): &(usize, usize)) -> FlowResult<Review> {
        Ok(match length.cmp(target) {
            std::cmp::Ordering::Less => Review::Revise,
            std::cmp::Ordering::Equal => Review::Approve,
            std::cmp::Ordering::Greater => Review::Reject,
        })
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (usize, usize), verdict: Review) -> FlowResult<Option<Review>> {
        println!("review verdict: {}", verdict.name());
        ctx.insert("verdict", verdict.name())?;
        Ok(Some(verdict))
    }
}

struct Publish;

impl Node for Publish {
    type Prep = Vec<String>;
    type Exec = String;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<String>> {
        ctx.require("paragraphs")
    }

    fn exec(&self, paragraphs: &Vec<String>) -> FlowResult<String> {
        Ok(paragraphs.join("\n\n"))
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: Vec<String>, document: String) -> FlowResult<Option<DefaultAction>> {
        println!("published:\n{}", document);
        ctx.insert("document", document)?;
        Ok(None)
    }
}

fn main() -> FlowResult<()> {
    lensflow::init();

    let graph = Graph::new();
    let draft = graph.add(Draft);
    let review = graph.add(Reviewer);
    let publish = graph.add(Publish);

    let _ = &draft >> &review;
    let _ = &review - Review::Revise >> &draft;
    let _ = &review - Review::Approve >> &publish;

    let flow = Flow::new(&draft).with_params(Params::new().with("target_paragraphs", 4));
    let shared = SharedState::new();
    let last = flow.run(&shared)?;

    println!("flow ended after action {:?}", last);
    Ok(())
}

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lensflow_core::{
    async_trait, AsyncBatchNode, AsyncFlow, DefaultAction, Flow, FlowResult, Graph, Node, RunCtx,
    SharedState,
};
use std::time::Duration;

struct Increment;

impl Node for Increment {
    type Prep = u64;
    type Exec = u64;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<u64> {
        ctx.get_or("counter", 0)
    }

    fn exec(&self, counter: &u64) -> FlowResult<u64> {
        Ok(counter + 1)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: u64, counter: u64) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("counter", counter)?;
        Ok(None)
    }
}

struct Square;

#[async_trait]
impl AsyncBatchNode for Square {
    type Item = u64;
    type Output = u64;
    type Action = DefaultAction;

    async fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<u64>> {
        ctx.require("items")
    }

    async fn exec(&self, item: &u64) -> FlowResult<u64> {
        tokio::task::yield_now().await;
        Ok(item * item)
    }

    async fn post(&self, ctx: RunCtx<'_, SharedState>, _items: Vec<u64>, outputs: Vec<u64>) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("squares", outputs)?;
        Ok(None)
    }
}

fn benchmark_linear_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow_execution");
    group.measurement_time(Duration::from_secs(10));

    for length in [1usize, 10, 100] {
        let graph = Graph::new();
        let start = graph.add(Increment);
        let mut last = start.clone();
        for _ in 1..length {
            last = &last >> &graph.add(Increment);
        }
        let flow = Flow::new(&start);

        group.bench_with_input(BenchmarkId::new("linear_flow", length), &flow, |b, flow| {
            b.iter(|| {
                let shared = SharedState::new();
                flow.run(&shared).unwrap();
            })
        });
    }

    group.finish();
}

fn benchmark_parallel_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_execution");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [10u64, 100, 1000] {
        let graph = Graph::new();
        let parallel = AsyncFlow::new(&graph.add_async_parallel_batch(Square));
        let sequential = AsyncFlow::new(&graph.add_async_batch(Square));
        let items: Vec<u64> = (0..size).collect();
        let items = &items;
        let parallel = &parallel;
        let sequential = &sequential;

        group.bench_function(BenchmarkId::new("parallel", size), |b| {
            b.to_async(&runtime).iter(move || async move {
                let shared = SharedState::new();
                shared.insert("items", items).unwrap();
                parallel.run(&shared).await.unwrap();
            })
        });
        group.bench_function(BenchmarkId::new("sequential", size), |b| {
            b.to_async(&runtime).iter(move || async move {
                let shared = SharedState::new();
                shared.insert("items", items).unwrap();
                sequential.run(&shared).await.unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_linear_flow, benchmark_parallel_batch);
criterion_main!(benches);

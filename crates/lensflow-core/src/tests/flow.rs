use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::support::{visited, Record, Visit};
use crate::*;

struct DoubleInput;

impl Node for DoubleInput {
    type Prep = i64;
    type Exec = i64;
    type Action = DefaultAction;

    fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<i64> {
        Ok(5)
    }

    fn exec(&self, input: &i64) -> FlowResult<i64> {
        Ok(input * 2)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: i64, output: i64) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("result", output)?;
        Ok(None)
    }
}

/// Fails until its `succeed_on`-th attempt
struct Flaky {
    calls: Arc<AtomicUsize>,
    succeed_on: usize,
    max_attempts: usize,
    fallback_errors: Arc<Mutex<Vec<String>>>,
}

impl Flaky {
    fn new(succeed_on: usize, max_attempts: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            succeed_on,
            max_attempts,
            fallback_errors: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Node for Flaky {
    type Prep = ();
    type Exec = String;
    type Action = DefaultAction;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::ZERO)
    }

    fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
        Ok(())
    }

    fn exec(&self, _prep: &()) -> FlowResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_on {
            Err(FlowError::node_execution("Flaky", format!("attempt {}", call)))
        } else {
            Ok("ok".to_string())
        }
    }

    fn exec_fallback(&self, _prep: &(), error: FlowError) -> FlowResult<String> {
        self.fallback_errors.lock().unwrap().push(error.to_string());
        Ok("fallback".to_string())
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (), exec: String) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("outcome", exec)?;
        Ok(None)
    }
}

struct DoubleEach;

impl BatchNode for DoubleEach {
    type Item = i64;
    type Output = i64;
    type Action = DefaultAction;

    fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<i64>> {
        ctx.require("numbers")
    }

    fn exec(&self, item: &i64) -> FlowResult<i64> {
        Ok(item * 2)
    }

    fn post(&self, ctx: RunCtx<'_, SharedState>, _items: Vec<i64>, outputs: Vec<i64>) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("doubled", outputs)?;
        Ok(None)
    }
}

#[test]
fn test_linear_chain_visits_in_order() {
    let graph = Graph::new();
    let a = graph.add(Visit::new("A"));
    let b = graph.add(Visit::new("B"));
    let c = graph.add(Visit::new("C"));
    let _ = &a >> &b >> &c;

    let shared = SharedState::new();
    let last = Flow::new(&a).run(&shared).unwrap();

    assert_eq!(visited(&shared), vec!["A", "B", "C"]);
    assert_eq!(last, None);
}

#[test]
fn test_single_node_flow_stores_result() {
    let graph = Graph::new();
    let x = graph.add(DoubleInput);
    let shared = SharedState::new();

    Flow::new(&x).run(&shared).unwrap();
    assert_eq!(shared.require::<i64>("result").unwrap(), 10);
}

#[test]
fn test_retry_until_success() {
    for n in 1..=4 {
        let node = Flaky::new(n, n);
        let calls = Arc::clone(&node.calls);
        let fallback_errors = Arc::clone(&node.fallback_errors);
        let graph = Graph::new();
        let flaky = graph.add(node);
        let shared = SharedState::new();

        Flow::new(&flaky).run(&shared).unwrap();
        assert_eq!(shared.require::<String>("outcome").unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), n);
        assert!(fallback_errors.lock().unwrap().is_empty());
    }
}

#[test]
fn test_fallback_called_once_with_last_error() {
    let node = Flaky::new(usize::MAX, 3);
    let calls = Arc::clone(&node.calls);
    let fallback_errors = Arc::clone(&node.fallback_errors);
    let graph = Graph::new();
    let flaky = graph.add(node);
    let shared = SharedState::new();

    Flow::new(&flaky).run(&shared).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(shared.require::<String>("outcome").unwrap(), "fallback");
    assert_eq!(
        *fallback_errors.lock().unwrap(),
        vec!["Node execution error: Node Flaky: attempt 3".to_string()]
    );
}

#[test]
fn test_retry_override_from_handle() {
    let node = Flaky::new(3, 1);
    let calls = Arc::clone(&node.calls);
    let graph = Graph::new();
    let flaky = graph.add(node);
    flaky.set_retry_policy(RetryPolicy::new(3, Duration::ZERO));

    let shared = SharedState::new();
    Flow::new(&flaky).run(&shared).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(shared.require::<String>("outcome").unwrap(), "ok");
}

#[test]
fn test_prep_error_is_not_retried() {
    struct NeedsInput {
        calls: Arc<AtomicUsize>,
    }

    impl Node for NeedsInput {
        type Prep = String;
        type Exec = ();
        type Action = DefaultAction;

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(5, Duration::ZERO)
        }

        fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.require("repo_url")
        }

        fn exec(&self, _prep: &String) -> FlowResult<()> {
            Ok(())
        }

        fn post(&self, _ctx: RunCtx<'_, SharedState>, _prep: String, _exec: ()) -> FlowResult<Option<DefaultAction>> {
            Ok(None)
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let graph = Graph::new();
    let start = graph.add(NeedsInput {
        calls: Arc::clone(&calls),
    });
    let after = graph.add(Visit::new("after"));
    let _ = &start >> &after;

    let shared = SharedState::new();
    match Flow::new(&start).run(&shared) {
        Err(FlowError::MissingKey(key)) => assert_eq!(key, "repo_url"),
        other => panic!("Expected MissingKey, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(visited(&shared).is_empty());
}

#[test]
fn test_branching_on_action() {
    let graph = Graph::new();
    let review = graph.add(Visit::returning("review", "reject"));
    let approve = graph.add(Visit::new("approve"));
    let reject = graph.add(Visit::new("reject"));
    let _ = &review - "approve" >> &approve;
    let _ = &review - "reject" >> &reject;

    let shared = SharedState::new();
    Flow::new(&review).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["review", "reject"]);
}

#[test]
fn test_unmatched_action_ends_flow() {
    let graph = Graph::new();
    let a = graph.add(Visit::returning("A", "unknown"));
    let b = graph.add(Visit::new("B"));
    let _ = &a >> &b;

    let shared = SharedState::new();
    let last = Flow::new(&a).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["A"]);
    assert_eq!(last.as_deref(), Some("unknown"));
}

#[test]
fn test_fallback_to_default_edge() {
    let graph = Graph::new();
    let a = graph.add(Visit::returning("A", "unknown"));
    let b = graph.add(Visit::new("B"));
    let _ = &a >> &b;

    let shared = SharedState::new();
    Flow::new(&a).fallback_to_default(true).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["A", "B"]);
}

#[test]
fn test_last_edge_registration_wins_at_runtime() {
    let graph = Graph::new();
    let a = graph.add(Visit::returning("A", "x"));
    let b = graph.add(Visit::new("B"));
    let c = graph.add(Visit::new("C"));
    a.next_on(&b, "x");
    a.next_on(&c, "x");

    let shared = SharedState::new();
    Flow::new(&a).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["A", "C"]);
}

#[test]
fn test_loop_until_condition() {
    struct Countdown;

    impl Node for Countdown {
        type Prep = u32;
        type Exec = u32;
        type Action = &'static str;

        fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<u32> {
            ctx.get_or("remaining", 3)
        }

        fn exec(&self, remaining: &u32) -> FlowResult<u32> {
            Ok(remaining - 1)
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: u32, remaining: u32) -> FlowResult<Option<&'static str>> {
            ctx.insert("remaining", remaining)?;
            ctx.push("visited", "tick")?;
            Ok(Some(if remaining == 0 { "done" } else { "again" }))
        }
    }

    let graph = Graph::new();
    let tick = graph.add(Countdown);
    let finish = graph.add(Visit::new("finish"));
    let _ = &tick - "again" >> &tick;
    let _ = &tick - "done" >> &finish;

    let shared = SharedState::new();
    Flow::new(&tick).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["tick", "tick", "tick", "finish"]);
}

#[test]
fn test_batch_node_doubles_in_order() {
    let graph = Graph::new();
    let double = graph.add_batch(DoubleEach);

    let shared = SharedState::new();
    shared.insert("numbers", vec![1, 2, 3]).unwrap();
    Flow::new(&double).run(&shared).unwrap();
    assert_eq!(shared.require::<Vec<i64>>("doubled").unwrap(), vec![2, 4, 6]);

    shared.insert("numbers", Vec::<i64>::new()).unwrap();
    Flow::new(&double).run(&shared).unwrap();
    assert!(shared.require::<Vec<i64>>("doubled").unwrap().is_empty());
}

#[test]
fn test_batch_node_retries_per_item() {
    struct FailOnce {
        attempts: Mutex<Vec<i64>>,
    }

    impl BatchNode for FailOnce {
        type Item = i64;
        type Output = i64;
        type Action = DefaultAction;

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(2, Duration::ZERO)
        }

        fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<i64>> {
            Ok(vec![1, 2])
        }

        fn exec(&self, item: &i64) -> FlowResult<i64> {
            let mut attempts = self.attempts.lock().unwrap();
            let first = !attempts.contains(item);
            attempts.push(*item);
            if first {
                Err(FlowError::other("first attempt fails"))
            } else {
                Ok(item * 10)
            }
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _items: Vec<i64>, outputs: Vec<i64>) -> FlowResult<Option<DefaultAction>> {
            ctx.insert("outputs", outputs)?;
            ctx.insert("attempts", self.attempts.lock().unwrap().clone())?;
            Ok(None)
        }
    }

    let graph = Graph::new();
    let node = graph.add_batch(FailOnce {
        attempts: Mutex::new(Vec::new()),
    });
    let shared = SharedState::new();
    Flow::new(&node).run(&shared).unwrap();

    assert_eq!(shared.require::<Vec<i64>>("outputs").unwrap(), vec![10, 20]);
    assert_eq!(shared.require::<Vec<i64>>("attempts").unwrap(), vec![1, 1, 2, 2]);
}

#[test]
fn test_batch_flow_isolates_params() {
    let graph = Graph::new();
    let record = graph.add(Record);

    let batch = BatchFlow::new(&record, |_: &SharedState| -> FlowResult<Vec<Params>> {
        Ok(vec![Params::new().with("x", 1), Params::new().with("x", 2)])
    });

    let shared = SharedState::new();
    batch.run(&shared).unwrap();
    assert_eq!(shared.require::<Vec<i64>>("seen").unwrap(), vec![1, 2]);

    // the flow's own parameters stay untouched
    assert!(batch.params().is_empty());
    shared.remove("seen");
    batch.run(&shared).unwrap();
    assert_eq!(shared.require::<Vec<i64>>("seen").unwrap(), vec![1, 2]);
}

#[test]
fn test_batch_flow_overlays_base_params() {
    struct Pair;

    impl Node for Pair {
        type Prep = (String, i64);
        type Exec = String;
        type Action = DefaultAction;

        fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<(String, i64)> {
            Ok((ctx.params().require("language")?, ctx.params().require("x")?))
        }

        fn exec(&self, (language, x): &(String, i64)) -> FlowResult<String> {
            Ok(format!("{}:{}", language, x))
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (String, i64), label: String) -> FlowResult<Option<DefaultAction>> {
            ctx.push("labels", label)?;
            Ok(None)
        }
    }

    struct Chapters;

    impl BatchParams for Chapters {
        fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<Params>> {
            let count: i64 = ctx.require("chapter_count")?;
            Ok((1..=count).map(|x| Params::new().with("x", x)).collect())
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, param_sets: Vec<Params>) -> FlowResult<()> {
            ctx.insert("passes", param_sets.len())
        }
    }

    let graph = Graph::new();
    let pair = graph.add(Pair);
    let batch = BatchFlow::new(&pair, Chapters)
        .with_params(Params::new().with("language", "fr").with("x", 0));

    let shared = SharedState::new();
    shared.insert("chapter_count", 3).unwrap();
    batch.run(&shared).unwrap();

    assert_eq!(
        shared.require::<Vec<String>>("labels").unwrap(),
        vec!["fr:1", "fr:2", "fr:3"]
    );
    assert_eq!(shared.require::<usize>("passes").unwrap(), 3);
}

#[test]
fn test_nested_flow_routes_on_inner_action() {
    let inner_graph = Graph::new();
    let validate = inner_graph.add(Visit::new("validate"));
    let verdict = inner_graph.add(Visit::returning("verdict", "rejected"));
    let _ = &validate >> &verdict;
    let inner = Flow::new(&validate).with_id("Review");

    let graph = Graph::new();
    let start = graph.add(Visit::new("start"));
    let review = graph.add_flow(inner);
    let publish = graph.add(Visit::new("publish"));
    let revise = graph.add(Visit::new("revise"));
    let _ = &start >> &review >> &publish;
    let _ = &review - "rejected" >> &revise;

    assert_eq!(review.id(), "Review");
    let shared = SharedState::new();
    Flow::new(&start).run(&shared).unwrap();
    assert_eq!(visited(&shared), vec!["start", "validate", "verdict", "revise"]);
}

#[test]
fn test_nested_flow_receives_outer_params() {
    let inner_graph = Graph::new();
    let record = inner_graph.add(Record);
    let inner = Flow::new(&record).with_params(Params::new().with("x", 1));

    let graph = Graph::new();
    let nested = graph.add_flow(inner);
    let outer = Flow::new(&nested).with_params(Params::new().with("x", 7));

    let shared = SharedState::new();
    outer.run(&shared).unwrap();
    assert_eq!(shared.require::<Vec<i64>>("seen").unwrap(), vec![7]);
}

#[test]
fn test_nested_batch_flow_selects_default_edge() {
    let inner_graph = Graph::new();
    let record = inner_graph.add(Record);
    let batch = BatchFlow::new(&record, |_: &SharedState| -> FlowResult<Vec<Params>> {
        Ok(vec![Params::new().with("x", 4), Params::new().with("x", 5)])
    });

    let graph = Graph::new();
    let fan_out = graph.add_batch_flow(batch);
    let done = graph.add(Visit::new("done"));
    let _ = &fan_out >> &done;

    let shared = SharedState::new();
    let last = Flow::new(&fan_out).run(&shared).unwrap();
    assert_eq!(last, None);
    assert_eq!(shared.require::<Vec<i64>>("seen").unwrap(), vec![4, 5]);
    assert_eq!(visited(&shared), vec!["done"]);
}

#[test]
fn test_flow_hooks() {
    struct Audit;

    impl FlowHooks for Audit {
        fn before(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
            ctx.push("visited", "before")
        }

        fn after(&self, ctx: RunCtx<'_, SharedState>, last_action: Option<String>) -> FlowResult<Option<String>> {
            ctx.insert("inner_action", &last_action)?;
            Ok(Some("audited".to_string()))
        }
    }

    let graph = Graph::new();
    let a = graph.add(Visit::returning("A", "finished"));
    let flow = Flow::new(&a).with_hooks(Audit);

    let shared = SharedState::new();
    let last = flow.run(&shared).unwrap();
    assert_eq!(last.as_deref(), Some("audited"));
    assert_eq!(visited(&shared), vec!["before", "A"]);
    assert_eq!(shared.get_value("inner_action"), Some(json!("finished")));
}

#[test]
fn test_sync_flow_rejects_async_node() {
    struct Remote;

    #[async_trait]
    impl AsyncNode for Remote {
        type Prep = ();
        type Exec = ();
        type Action = DefaultAction;

        async fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
            Ok(())
        }

        async fn exec(&self, _prep: &()) -> FlowResult<()> {
            Ok(())
        }

        async fn post(&self, _ctx: RunCtx<'_, SharedState>, _prep: (), _exec: ()) -> FlowResult<Option<DefaultAction>> {
            Ok(None)
        }
    }

    let graph = Graph::new();
    let a = graph.add(Visit::new("A"));
    let remote = graph.add_async(Remote);
    let _ = &a >> &remote;
    assert!(remote.is_async());

    let shared = SharedState::new();
    match Flow::new(&a).run(&shared) {
        Err(FlowError::AsyncNodeInSyncFlow(id)) => assert_eq!(id, "Remote"),
        other => panic!("Expected AsyncNodeInSyncFlow, got {:?}", other),
    }
    assert_eq!(visited(&shared), vec!["A"]);
    assert!(matches!(
        remote.run(&shared),
        Err(FlowError::AsyncNodeInSyncFlow(_))
    ));
}

#[test]
fn test_flow_with_config() {
    let node = Flaky::new(4, 1);
    let calls = Arc::clone(&node.calls);
    let graph = Graph::new();
    let flaky = graph.add(node);
    let b = graph.add(Visit::new("B"));
    let _ = &flaky - "retry-exhausted" >> &b;

    let config = FlowConfig::from_json_str(
        r#"{"fallback_to_default": true, "nodes": {"Flaky": {"max_attempts": 4}}}"#,
    )
    .unwrap();
    let flow = Flow::new(&flaky).with_config(&config).unwrap();

    assert_eq!(flaky.retry_policy().max_attempts(), 4);
    let shared = SharedState::new();
    flow.run(&shared).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(shared.require::<String>("outcome").unwrap(), "ok");
    // no default edge, so fallback_to_default changes nothing here
    assert!(visited(&shared).is_empty());
}

#[test]
fn test_rerun_starts_fresh() {
    let graph = Graph::new();
    let record = graph.add(Record);
    let flow = Flow::new(&record);

    let shared = SharedState::new();
    flow.run_with_params(&shared, &Params::new().with("x", 3)).unwrap();
    assert!(matches!(flow.run(&shared), Err(FlowError::MissingParam(_))));
    assert_eq!(shared.require::<Vec<i64>>("seen").unwrap(), vec![3]);
}

#[test]
fn test_config_reaches_nested_flows() {
    let node = Flaky::new(3, 1);
    let calls = Arc::clone(&node.calls);
    let inner_graph = Graph::new();
    let flaky = inner_graph.add(node);
    let ask = inner_graph.add(Visit::returning("ask", "unknown"));
    let answer = inner_graph.add(Visit::new("answer"));
    let _ = &flaky >> &ask >> &answer;
    let inner = Flow::new(&flaky).with_id("Inner");

    let graph = Graph::new();
    let nested = graph.add_flow(inner);
    let config = FlowConfig::from_json_str(
        r#"{"fallback_to_default": true, "nodes": {"Flaky": {"max_attempts": 3}}}"#,
    )
    .unwrap();
    let outer = Flow::new(&nested).with_config(&config).unwrap();

    assert_eq!(flaky.retry_policy().max_attempts(), 3);
    let shared = SharedState::new();
    outer.run(&shared).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(shared.require::<String>("outcome").unwrap(), "ok");
    // the nested flow follows the default edge out of "ask" too
    assert_eq!(visited(&shared), vec!["ask", "answer"]);
}

#[test]
fn test_invalid_config_changes_nothing() {
    let graph = Graph::new();
    let flaky = graph.add(Flaky::new(1, 2));
    let config = FlowConfig::default()
        .with_node("Flaky", RetryConfig { max_attempts: 5, wait_secs: 0.0 })
        .with_node("Other", RetryConfig { max_attempts: 2, wait_secs: -1.0 });

    assert!(matches!(
        Flow::new(&flaky).with_config(&config),
        Err(FlowError::Config(_))
    ));
    assert_eq!(flaky.retry_policy().max_attempts(), 2);
}

#[test]
fn test_post_error_aborts_flow() {
    struct Reject;

    impl Node for Reject {
        type Prep = ();
        type Exec = ();
        type Action = DefaultAction;

        fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
            Ok(())
        }

        fn exec(&self, _prep: &()) -> FlowResult<()> {
            Ok(())
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (), _exec: ()) -> FlowResult<Option<DefaultAction>> {
            ctx.push("visited", "reject")?;
            Err(FlowError::node_execution("Reject", "malformed summary"))
        }
    }

    let graph = Graph::new();
    let reject = graph.add(Reject);
    let after = graph.add(Visit::new("after"));
    let _ = &reject >> &after;

    let shared = SharedState::new();
    match Flow::new(&reject).run(&shared) {
        Err(err) => assert_eq!(err.to_string(), "Node execution error: Node Reject: malformed summary"),
        Ok(action) => panic!("Expected failure, got {:?}", action),
    }
    assert_eq!(visited(&shared), vec!["reject"]);
}

#[test]
fn test_default_fallback_reraises_last_error() {
    struct Unreachable {
        calls: Arc<AtomicUsize>,
    }

    impl Node for Unreachable {
        type Prep = ();
        type Exec = ();
        type Action = DefaultAction;

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(2, Duration::ZERO)
        }

        fn prep(&self, _ctx: RunCtx<'_, SharedState>) -> FlowResult<()> {
            Ok(())
        }

        fn exec(&self, _prep: &()) -> FlowResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(FlowError::other(format!("upstream down ({})", call)))
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _prep: (), _exec: ()) -> FlowResult<Option<DefaultAction>> {
            ctx.push("visited", "unreachable")?;
            Ok(None)
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let graph = Graph::new();
    let fetch = graph.add(Unreachable {
        calls: Arc::clone(&calls),
    });
    let after = graph.add(Visit::new("after"));
    let _ = &fetch >> &after;

    let shared = SharedState::new();
    match Flow::new(&fetch).run(&shared) {
        Err(FlowError::Other(message)) => assert_eq!(message, "upstream down (2)"),
        other => panic!("Expected the last exec error, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(visited(&shared).is_empty());
}

#[test]
fn test_batch_node_fallback_per_item() {
    struct SkipOdd {
        fallbacks: Mutex<Vec<i64>>,
    }

    impl BatchNode for SkipOdd {
        type Item = i64;
        type Output = i64;
        type Action = DefaultAction;

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(2, Duration::ZERO)
        }

        fn prep(&self, ctx: RunCtx<'_, SharedState>) -> FlowResult<Vec<i64>> {
            ctx.require("numbers")
        }

        fn exec(&self, item: &i64) -> FlowResult<i64> {
            if item % 2 == 1 {
                Err(FlowError::other(format!("odd {}", item)))
            } else {
                Ok(item * 10)
            }
        }

        fn exec_fallback(&self, item: &i64, error: FlowError) -> FlowResult<i64> {
            assert_eq!(error.to_string(), format!("odd {}", item));
            self.fallbacks.lock().unwrap().push(*item);
            Ok(-1)
        }

        fn post(&self, ctx: RunCtx<'_, SharedState>, _items: Vec<i64>, outputs: Vec<i64>) -> FlowResult<Option<DefaultAction>> {
            ctx.insert("outputs", outputs)?;
            ctx.insert("fallbacks", self.fallbacks.lock().unwrap().clone())?;
            Ok(None)
        }
    }

    let graph = Graph::new();
    let node = graph.add_batch(SkipOdd {
        fallbacks: Mutex::new(Vec::new()),
    });
    let shared = SharedState::new();
    shared.insert("numbers", vec![1, 2, 3, 4]).unwrap();
    Flow::new(&node).run(&shared).unwrap();

    assert_eq!(shared.require::<Vec<i64>>("outputs").unwrap(), vec![-1, 20, -1, 40]);
    assert_eq!(shared.require::<Vec<i64>>("fallbacks").unwrap(), vec![1, 3]);
}

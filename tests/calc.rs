//! Arithmetic trees: caching behavior, mutation and tree assembly.

use std::sync::Arc;

use memo_flow::{
    Arg, CachePolicy, Canceled, ComputeRuntime, Computation, Dependency, Descriptor,
    EventCollector, Inputs, Monitor, Node, Outcome, Problem, Slot,
};

// ============================================================================
// Kinds
// ============================================================================

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Const(i64);

impl Computation for Const {
    type Output = i64;

    fn compute(&self, _inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
        Ok(Outcome::of(self.0))
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Sum;

impl Sum {
    const LEFT: Dependency<i64> = Dependency::new(0, "left");
    const RIGHT: Dependency<i64> = Dependency::new(1, "right");
}

impl Computation for Sum {
    type Output = i64;

    fn dependencies() -> Descriptor {
        Descriptor::new([Slot::of(Self::LEFT), Slot::of(Self::RIGHT)])
    }

    fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
        Ok(inputs
            .get(Self::LEFT)
            .flat_map(|l| inputs.get(Self::RIGHT).map(|r| *l + *r)))
    }
}

/// Integer division; the divisor defaults to one.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Div;

impl Div {
    const DIVIDEND: Dependency<i64> = Dependency::new(0, "dividend");
    const DIVISOR: Dependency<i64> = Dependency::new(1, "divisor");
}

impl Computation for Div {
    type Output = i64;

    fn dependencies() -> Descriptor {
        Descriptor::new([
            Slot::of(Self::DIVIDEND),
            Slot::with_default(Self::DIVISOR, || Node::leaf(Const(1)).unwrap()),
        ])
    }

    fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
        Ok(inputs.get(Self::DIVIDEND).flat_map(|dividend| {
            inputs.get(Self::DIVISOR).flat_map(|divisor| match *divisor {
                0 => Outcome::failure(Problem::error("division by zero")),
                divisor => Outcome::of(*dividend / divisor),
            })
        }))
    }
}

/// Renders its input, warning when it is negative.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Show {
    prefix: String,
}

impl Show {
    const INPUT: Dependency<i64> = Dependency::new(0, "input");
}

impl Computation for Show {
    type Output = String;

    fn dependencies() -> Descriptor {
        Descriptor::new([Slot::of(Self::INPUT)])
    }

    fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<String>, Canceled> {
        Ok(inputs.get(Self::INPUT).flat_map(|value| {
            let text = format!("{}{}", self.prefix, value);
            if *value < 0 {
                Outcome::of(text).and_warning("negative value")
            } else {
                Outcome::of(text)
            }
        }))
    }
}

fn constant(value: i64) -> Node<i64> {
    Node::leaf(Const(value)).unwrap()
}

fn sum(left: &Node<i64>, right: &Node<i64>) -> Node<i64> {
    Node::from_args(Sum, [Arg::from(left), Arg::from(right)]).unwrap()
}

fn traced(policy: CachePolicy) -> (ComputeRuntime, Arc<EventCollector>) {
    let collector = Arc::new(EventCollector::new());
    let runtime = ComputeRuntime::builder()
        .policy(policy)
        .tracer(collector.clone())
        .build();
    (runtime, collector)
}

// ============================================================================
// Evaluation and caching
// ============================================================================

#[test]
fn test_sum_computed_once_per_node_with_all_policy() {
    let (runtime, collector) = traced(CachePolicy::All);
    let tree = sum(&constant(5), &constant(7));

    let first = runtime.compute(&tree, &Monitor::new());
    let second = runtime.compute(&tree, &Monitor::new());

    assert_eq!(first.value().map(|v| **v), Some(12));
    assert_eq!(first, second);
    assert_eq!(collector.executions_of::<Const>(), 2);
    assert_eq!(collector.executions_of::<Sum>(), 1);
}

#[test]
fn test_rebuilt_tree_hits_cache() {
    let (runtime, collector) = traced(CachePolicy::TopLevelOnly);

    runtime.compute(&sum(&constant(1), &constant(2)), &Monitor::new());
    let rebuilt = sum(&constant(1), &constant(2));
    assert!(runtime.contains(&rebuilt));

    let outcome = runtime.compute(&rebuilt, &Monitor::new());
    assert_eq!(outcome.value().map(|v| **v), Some(3));
    assert_eq!(collector.executions_of::<Sum>(), 1);
}

#[test]
fn test_kind_fields_are_part_of_the_key() {
    let (runtime, collector) = traced(CachePolicy::All);
    let value = constant(-3);
    let plain = Node::new(Show { prefix: String::new() }, [value.clone().into_any()]).unwrap();
    let labeled = Node::new(Show { prefix: "x = ".into() }, [value.into_any()]).unwrap();

    let plain = runtime.compute(&plain, &Monitor::new());
    let labeled = runtime.compute(&labeled, &Monitor::new());

    assert_eq!(plain.value().map(|s| s.as_str()), Some("-3"));
    assert_eq!(labeled.value().map(|s| s.as_str()), Some("x = -3"));
    assert_eq!(labeled.problems().len(), 1);
    assert!(!labeled.has_errors());
    assert_eq!(collector.executions_of::<Show>(), 2);
    assert_eq!(collector.executions_of::<Const>(), 1);
}

#[test]
fn test_shared_child_in_dag_executes_once() {
    let (runtime, collector) = traced(CachePolicy::All);
    let shared = sum(&constant(2), &constant(3));
    let left = sum(&shared, &constant(10));
    let right = sum(&shared, &constant(20));
    let root = sum(&left, &right);

    let outcome = runtime.compute(&root, &Monitor::new());

    assert_eq!(outcome.value().map(|v| **v), Some(40));
    // root, left, right and shared
    assert_eq!(collector.executions_of::<Sum>(), 4);
}

#[test]
fn test_error_outcome_propagates_to_dependents() {
    let runtime = ComputeRuntime::new();
    let quotient = Node::new(Div, [constant(10).into_any(), constant(0).into_any()]).unwrap();
    let total = sum(&quotient, &constant(1));

    let outcome = runtime.compute(&total, &Monitor::new());

    assert!(outcome.is_empty());
    assert_eq!(outcome.problems().len(), 1);
    assert_eq!(outcome.problems()[0].to_string(), "error: division by zero");
    assert!(outcome.into_result().is_err());
}

#[test]
fn test_defaults_fill_unset_divisor() {
    let runtime = ComputeRuntime::new();
    let quotient = Node::with_defaults(Div, [Some(constant(9).into_any())]).unwrap();

    let outcome = runtime.compute(&quotient, &Monitor::new());
    assert_eq!(outcome.value().map(|v| **v), Some(9));
}

fn doubled_chain(depth: usize) -> Node<i64> {
    let mut node = constant(1);
    for _ in 0..depth {
        node = sum(&node, &node);
    }
    node
}

#[test]
fn test_deep_doubly_shared_chain_is_computed_per_distinct_node() {
    let (runtime, collector) = traced(CachePolicy::All);
    let chain = doubled_chain(40);

    let outcome = runtime.compute(&chain, &Monitor::new());
    assert_eq!(outcome.value().map(|v| **v), Some(1 << 40));
    assert_eq!(collector.executions_of::<Sum>(), 40);
    assert_eq!(collector.executions_of::<Const>(), 1);
    assert_eq!(chain.fingerprint().size(), 41);
    assert_eq!(runtime.len(), 41);

    // An independently built chain is equal and answered from the cache.
    let rebuilt = doubled_chain(40);
    assert_eq!(rebuilt, chain);
    assert!(runtime.contains(&rebuilt));
    let again = runtime.compute(&rebuilt, &Monitor::new());
    assert_eq!(again.value().map(|v| **v), Some(1 << 40));
    assert_eq!(collector.executions_of::<Sum>(), 40);
}

// ============================================================================
// Mutation
// ============================================================================

#[test]
fn test_set_dependency_invalidates_by_fingerprint() {
    let (runtime, collector) = traced(CachePolicy::TopLevelOnly);
    let tree = sum(&constant(5), &constant(7));

    assert_eq!(runtime.compute(&tree, &Monitor::new()).value().map(|v| **v), Some(12));

    tree.set_dependency(Sum::RIGHT, &constant(8)).unwrap();
    assert_eq!(runtime.compute(&tree, &Monitor::new()).value().map(|v| **v), Some(13));
    assert_eq!(collector.executions_of::<Sum>(), 2);

    // Restoring the original structure reuses the first entry.
    tree.set_dependency(Sum::RIGHT, &constant(7)).unwrap();
    assert_eq!(runtime.compute(&tree, &Monitor::new()).value().map(|v| **v), Some(12));
    assert_eq!(collector.executions_of::<Sum>(), 2);
    assert_eq!(runtime.len(), 2);
}

#[test]
fn test_clone_node_shares_cache_entry_until_changed() {
    let (runtime, collector) = traced(CachePolicy::TopLevelOnly);
    let tree = sum(&constant(1), &constant(1));
    runtime.compute(&tree, &Monitor::new());

    let copy = tree.clone_node();
    runtime.compute(&copy, &Monitor::new());
    assert_eq!(collector.executions_of::<Sum>(), 1);

    copy.set_dependency(Sum::LEFT, &constant(4)).unwrap();
    let outcome = runtime.compute(&copy, &Monitor::new());
    assert_eq!(outcome.value().map(|v| **v), Some(5));
    assert_eq!(collector.executions_of::<Sum>(), 2);

    assert_eq!(runtime.get(&tree).and_then(|o| o.into_value()).map(|v| *v), Some(2));
}

#[test]
fn test_fingerprints_enumerate_cached_roots() {
    let runtime = ComputeRuntime::with_policy(CachePolicy::TopLevelOnly);
    let a = sum(&constant(1), &constant(2));
    let b = sum(&constant(3), &constant(4));
    runtime.compute(&a, &Monitor::new());
    runtime.compute(&b, &Monitor::new());

    let mut keys = runtime.fingerprints();
    keys.sort_by_key(|key| key.debug_repr());
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&a.fingerprint()));
    assert!(keys.contains(&b.fingerprint()));
    assert!(keys.iter().all(|key| key.size() == 3));

    runtime.clear();
    assert!(runtime.is_empty());
}

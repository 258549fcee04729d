#![allow(dead_code)]

use ctg::{
    config::Config,
    graph::TaskGraph,
    task::{Task, TaskHandle},
    types::NodeIndex,
};
use std::{
    io,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs go through the test writer, so they only show up for failing tests
/// (unless run with `-- --nocapture`). Enable levels with e.g.
/// `RUST_LOG=ctg=trace cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// In-memory log sink for `capture_logs`.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber that keeps events up to `level` and
/// return everything it logged.
pub fn capture_logs(level: tracing::Level, f: impl FnOnce()) -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

/// Shared sequence generators handed to every task of one test graph.
///
/// `init`, `work` and `complete` count calls of each callback kind separately
/// (1-based). `clock` is bumped by both `on_work` and `on_complete`, giving one
/// total order across both kinds, which lets tests check that a dependency's
/// completion happened before its dependent's work.
#[derive(Debug, Default)]
pub struct Sequencers {
    init: AtomicUsize,
    work: AtomicUsize,
    complete: AtomicUsize,
    clock: AtomicUsize,
}

impl Sequencers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Clone)]
pub struct TestConfig;

impl Config for TestConfig {
    type Task = TestTask;
}

/// Task whose `on_init` registers a configurable list of dependencies and whose
/// callbacks record the sequence numbers they observed.
pub struct TestTask {
    pub name: &'static str,
    deps: Mutex<Vec<TaskHandle<TestConfig>>>,
    seq: Arc<Sequencers>,
    work_delay: Duration,

    pub init_val: AtomicUsize,
    pub work_val: AtomicUsize,
    pub complete_val: AtomicUsize,
    /// `clock` value taken when `on_work` started.
    pub work_started: AtomicUsize,
    /// `clock` value taken when `on_complete` finished.
    pub completed_at: AtomicUsize,

    pub init_calls: AtomicUsize,
    pub work_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
}

impl Task<TestConfig> for TestTask {
    fn on_init(&self, graph: &mut TaskGraph<TestConfig>) {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        self.init_val
            .store(Sequencers::next(&self.seq.init), Ordering::Relaxed);
        let deps = self.deps.lock().unwrap().clone();
        if !deps.is_empty() {
            graph.register(deps);
        }
    }

    fn on_work(&self, _graph: &TaskGraph<TestConfig>) {
        self.work_calls.fetch_add(1, Ordering::Relaxed);
        self.work_started
            .store(Sequencers::next(&self.seq.clock), Ordering::Relaxed);
        self.work_val
            .store(Sequencers::next(&self.seq.work), Ordering::Relaxed);
        if !self.work_delay.is_zero() {
            thread::sleep(self.work_delay);
        }
    }

    fn on_complete(&self, _graph: &TaskGraph<TestConfig>) {
        self.complete_calls.fetch_add(1, Ordering::Relaxed);
        self.complete_val
            .store(Sequencers::next(&self.seq.complete), Ordering::Relaxed);
        self.completed_at
            .store(Sequencers::next(&self.seq.clock), Ordering::Relaxed);
    }
}

impl TestTask {
    pub fn init_val(&self) -> usize {
        self.init_val.load(Ordering::Relaxed)
    }

    pub fn work_val(&self) -> usize {
        self.work_val.load(Ordering::Relaxed)
    }

    pub fn complete_val(&self) -> usize {
        self.complete_val.load(Ordering::Relaxed)
    }
}

pub fn task(name: &'static str, seq: &Arc<Sequencers>) -> TaskHandle<TestConfig> {
    slow_task(name, seq, Duration::ZERO)
}

pub fn slow_task(
    name: &'static str,
    seq: &Arc<Sequencers>,
    work_delay: Duration,
) -> TaskHandle<TestConfig> {
    TaskHandle::new(TestTask {
        name,
        deps: Mutex::new(vec![]),
        seq: Arc::clone(seq),
        work_delay,
        init_val: AtomicUsize::new(0),
        work_val: AtomicUsize::new(0),
        complete_val: AtomicUsize::new(0),
        work_started: AtomicUsize::new(0),
        completed_at: AtomicUsize::new(0),
        init_calls: AtomicUsize::new(0),
        work_calls: AtomicUsize::new(0),
        complete_calls: AtomicUsize::new(0),
    })
}

/// Make `task` register `deps` (in this order) when it is initialized.
pub fn depend(task: &TaskHandle<TestConfig>, deps: &[&TaskHandle<TestConfig>]) {
    task.deps
        .lock()
        .unwrap()
        .extend(deps.iter().map(|&dep| dep.clone()));
}

/// Build a graph from `roots` and initialize it.
pub fn initialized(roots: &[&TaskHandle<TestConfig>]) -> TaskGraph<TestConfig> {
    init_tracing();
    let mut graph = TaskGraph::new();
    graph.register(roots.iter().map(|&root| root.clone()));
    graph.initialize().expect("graph must be acyclic");
    graph
}

pub fn pool(threads: usize) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .unwrap()
}

/// Every edge "node depends on dep": dep's work started before node's work,
/// and dep's completion finished before node's completion. Holds in both
/// execution modes.
pub fn assert_dependency_order(graph: &TaskGraph<TestConfig>) {
    for_each_edge(graph, |node, dep| {
        let (node_work, dep_work) = (clock(&node.work_started), clock(&dep.work_started));
        assert!(
            dep_work < node_work,
            "{} started work at {dep_work}, after {} at {node_work}",
            dep.name,
            node.name,
        );
        let (node_done, dep_done) = (clock(&node.completed_at), clock(&dep.completed_at));
        assert!(
            dep_done < node_done,
            "{} completed at {dep_done}, after {} at {node_done}",
            dep.name,
            node.name,
        );
    });
}

/// Every edge "node depends on dep": dep completed before node started
/// working. Only the parallel scheduler interleaves completions with work.
pub fn assert_completed_before_work(graph: &TaskGraph<TestConfig>) {
    for_each_edge(graph, |node, dep| {
        let started = clock(&node.work_started);
        let completed = clock(&dep.completed_at);
        assert!(
            completed < started,
            "{} completed at {completed}, but {} started at {started}",
            dep.name,
            node.name,
        );
    });
}

fn clock(value: &AtomicUsize) -> usize {
    value.load(Ordering::Relaxed)
}

fn for_each_edge(graph: &TaskGraph<TestConfig>, mut check: impl FnMut(&TestTask, &TestTask)) {
    for idx in 0..graph.len() {
        let idx = NodeIndex::try_from(idx).unwrap();
        let node: &TestTask = graph.task(idx).unwrap();
        for dep_idx in graph.dependencies_of(idx) {
            let dep: &TestTask = graph.task(dep_idx).unwrap();
            check(node, dep);
        }
    }
}

/// Every task of the graph ran each callback exactly `runs` times.
pub fn assert_ran(graph: &TaskGraph<TestConfig>, runs: usize) {
    for idx in 0..graph.len() {
        let task = graph.task(NodeIndex::try_from(idx).unwrap()).unwrap();
        assert_eq!(task.init_calls.load(Ordering::Relaxed), 1, "{}", task.name);
        assert_eq!(task.work_calls.load(Ordering::Relaxed), runs, "{}", task.name);
        assert_eq!(
            task.complete_calls.load(Ordering::Relaxed),
            runs,
            "{}",
            task.name
        );
    }
}

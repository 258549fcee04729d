mod execute;
mod setup;

/// Error returned by `TaskGraph::initialize` when the discovered graph is
/// invalid.
///
/// Specifically, this is produced when cycle validation finds a node that
/// can reach itself by following dependency edges.
pub use crate::graph::setup::TaskGraphError;
use crate::{
    config::Config,
    sync::AtomicU32,
    task::TaskHandle,
    types::{HashMap, IndexSet, NodeIndex},
};
use core::sync::atomic::{AtomicU8, Ordering};
use derive_more::Debug;
use std::collections::hash_map::Entry;
use tracing::debug;

/// Dependency graph of tasks that is discovered while it is initialized and
/// then run any number of times.
///
/// Key responsibilities:
/// - Deduplicates tasks by identity and assigns dense, stable indices in
///   registration order.
/// - Records every task registered from inside an `on_init` callback as a
///   dependency of the task being initialized, initializing newly discovered
///   tasks in the same pass.
/// - Rejects cycles, then freezes an order sorted by level (longest chain down
///   to a leaf) in which every dependency precedes its dependents.
/// - Runs the frozen order single-threaded, or in parallel by releasing each
///   node the moment its last dependency has completed.
///
/// Lifecycle: `register` roots, `initialize` once, then `run_sequential` /
/// `run_parallel` as often as needed. `reset` returns the graph to an empty
/// state.
#[must_use]
#[derive(Debug)]
pub struct TaskGraph<C: Config> {
    /// Append-only node storage; a node's position is its index.
    nodes: Vec<Node<C>>,
    /// Deduplication map from task identity to node index.
    handle_to_index: HashMap<TaskHandle<C>, NodeIndex>,
    /// Node whose `on_init` callback is currently running.
    init_cursor: Option<NodeIndex>,
    /// All node indices sorted ascending by level, ties by index.
    sorted_order: Vec<NodeIndex>,
    phase: GraphPhase,
}

/// Lifecycle phase of a [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPhase {
    /// Accepting registrations; `initialize` has not been called yet.
    Building,
    /// `initialize` is walking the nodes and invoking `on_init` callbacks.
    Initializing,
    /// Frozen and ready to run.
    Ready,
    /// `initialize` found a cycle. The graph must not be run.
    Poisoned,
}

/// Run state of a single node.
///
/// Transitions are monotonic within a run:
/// `Pending -> Ready -> Running -> Completed`. Every run starts with all nodes
/// back in `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NodeState {
    /// Waiting for at least one dependency.
    Pending = 0,
    /// All dependencies have completed; the node is queued.
    Ready = 1,
    /// `on_work` has started and `on_complete` has not returned yet.
    Running = 2,
    /// `on_complete` has returned.
    Completed = 3,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Completed,
            _ => unreachable!("NodeState::from_u8: {value}"),
        }
    }
}

#[must_use]
#[derive(Debug)]
pub(crate) struct Node<C: Config> {
    task: TaskHandle<C>,
    /// Indexes of the nodes this node depends on, in recording order.
    dependencies: IndexSet<NodeIndex>,
    /// Longest dependency chain down to a leaf. Set by `initialize`.
    level: Option<u32>,
    /// Indexes of the dependents whose only dependency is this node. They can
    /// be released immediately after this node completes without touching a
    /// counter.
    owned_dependents: Vec<NodeIndex>,
    /// Indexes of the dependents that have other dependencies as well.
    shared_dependents: Vec<NodeIndex>,
    sched: SchedulingSlot,
}

impl<C: Config> Node<C> {
    fn new(task: TaskHandle<C>) -> Self {
        Self {
            task,
            dependencies: IndexSet::default(),
            level: None,
            owned_dependents: vec![],
            shared_dependents: vec![],
            sched: SchedulingSlot::default(),
        }
    }
}

/// Per-run scheduling state, padded to its own cache lines since worker
/// threads hammer neighbouring counters concurrently.
#[must_use]
#[derive(Debug)]
#[repr(align(128))]
pub(crate) struct SchedulingSlot {
    /// Number of dependencies that haven't completed yet in the current run.
    remaining_deps: AtomicU32,
    /// Current `NodeState` as its `u8` discriminant.
    state: AtomicU8,
}

impl Default for SchedulingSlot {
    fn default() -> Self {
        Self {
            remaining_deps: AtomicU32::new(0),
            state: AtomicU8::new(NodeState::Pending as u8),
        }
    }
}

impl SchedulingSlot {
    fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn reset(&mut self, dependencies: usize) {
        self.remaining_deps = AtomicU32::new(
            dependencies
                .try_into()
                .expect("SchedulingSlot::reset: [1]"),
        );
        *self.state.get_mut() = NodeState::Pending as u8;
    }

    /// Move this node from `from` to `to`.
    ///
    /// # Panics
    /// If the node is not in state `from`: a node was scheduled twice or out of
    /// order.
    fn advance(&self, index: NodeIndex, from: NodeState, to: NodeState) {
        debug_assert!(from < to, "SchedulingSlot::advance: [1]");
        if let Err(actual) =
            self.state
                .compare_exchange(from as u8, to as u8, Ordering::Relaxed, Ordering::Relaxed)
        {
            panic!(
                "Node {index} cannot move {from:?} -> {to:?}: it is {:?}",
                NodeState::from_u8(actual)
            );
        }
    }
}

impl<C: Config> Default for TaskGraph<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> TaskGraph<C> {
    /// Create an empty graph in the `Building` phase.
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            handle_to_index: HashMap::default(),
            init_cursor: None,
            sorted_order: vec![],
            phase: GraphPhase::Building,
        }
    }

    /// Add tasks to the graph.
    ///
    /// Each task not yet present gets a new node with the next free index;
    /// tasks that are already present are left untouched. When called from a
    /// task's `on_init`, every passed task (new or not) additionally becomes a
    /// dependency of that task. Repeated edges are recorded once.
    ///
    /// # Panics
    /// - If the graph has already been initialized.
    /// - If a task registers itself while being initialized. The graph is
    ///   left `Poisoned`, so it can still be `reset`.
    /// - In debug builds, if `tasks` is empty.
    pub fn register<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = TaskHandle<C>>,
    {
        assert!(
            matches!(self.phase, GraphPhase::Building | GraphPhase::Initializing),
            "TaskGraph::register called on a frozen graph ({:?})",
            self.phase
        );
        let mut num_registered = 0usize;
        for task in tasks {
            num_registered += 1;
            let index = match self.handle_to_index.entry(task) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    let index = self
                        .nodes
                        .len()
                        .try_into()
                        .expect("TaskGraph::register: [1]");
                    self.nodes.push(Node::new(entry.key().clone()));
                    entry.insert(index);
                    debug!(node = index, "registered task");
                    index
                }
            };
            let Some(current) = self.init_cursor else {
                continue;
            };
            if current == index {
                // Leave the graph resettable if the host catches the panic.
                self.init_cursor = None;
                self.phase = GraphPhase::Poisoned;
                panic!("Task {index} registered itself as its own dependency");
            }
            if self.nodes[current as usize].dependencies.insert(index) {
                debug!(node = current, dependency = index, "recorded dependency");
            }
        }
        debug_assert_ne!(num_registered, 0, "TaskGraph::register called without tasks");
    }

    /// Return the graph to an empty `Building` phase, dropping every node.
    ///
    /// # Panics
    /// If called from inside an `on_init` callback.
    pub fn reset(&mut self) {
        assert_ne!(
            self.phase,
            GraphPhase::Initializing,
            "TaskGraph::reset called during initialization"
        );
        self.nodes.clear();
        self.handle_to_index.clear();
        self.sorted_order.clear();
        self.init_cursor = None;
        self.phase = GraphPhase::Building;
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no task has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `task` has been registered.
    #[must_use]
    pub fn contains(&self, task: &TaskHandle<C>) -> bool {
        self.handle_to_index.contains_key(task)
    }

    /// Node index assigned to `task`, if registered.
    #[must_use]
    pub fn index_of(&self, task: &TaskHandle<C>) -> Option<NodeIndex> {
        self.handle_to_index.get(task).copied()
    }

    /// Task stored at `index`.
    #[must_use]
    pub fn task(&self, index: NodeIndex) -> Option<&TaskHandle<C>> {
        self.nodes.get(index as usize).map(|node| &node.task)
    }

    /// Indexes of the nodes `index` depends on, in the order they were first
    /// recorded.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn dependencies_of(&self, index: NodeIndex) -> impl ExactSizeIterator<Item = NodeIndex> {
        self.nodes[index as usize].dependencies.iter().copied()
    }

    /// Level of the node at `index`: 0 for nodes without dependencies,
    /// otherwise one more than the highest level among its dependencies.
    ///
    /// `None` until the graph has been initialized, or if `index` is out of
    /// bounds.
    #[must_use]
    pub fn level_of(&self, index: NodeIndex) -> Option<u32> {
        self.nodes.get(index as usize).and_then(|node| node.level)
    }

    /// All node indexes sorted ascending by level, ties broken by index.
    ///
    /// Every dependency appears before its dependents. Empty until the graph
    /// has been initialized.
    #[must_use]
    pub fn sorted_order(&self) -> &[NodeIndex] {
        &self.sorted_order
    }

    /// Contiguous runs of `sorted_order` sharing one level, lowest first.
    ///
    /// Nodes inside one band never depend on each other, directly or
    /// transitively.
    pub fn independence_bands(&self) -> impl Iterator<Item = &[NodeIndex]> {
        self.sorted_order
            .chunk_by(|&lhs, &rhs| self.level_of(lhs) == self.level_of(rhs))
    }

    /// Run state of the node at `index` in the current or latest run.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    #[must_use]
    pub fn state_of(&self, index: NodeIndex) -> NodeState {
        self.nodes[index as usize].sched.state()
    }
}

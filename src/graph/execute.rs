use crate::{
    config::Config,
    graph::{GraphPhase, NodeState, TaskGraph},
    pool::{Job, Spawner, WorkerPool},
    sync::{AtomicU32, Ordering, fence},
    task::Task,
    types::NodeIndex,
};
use tracing::{debug_span, trace};

impl<C: Config> TaskGraph<C> {
    /// Run every task on the calling thread.
    ///
    /// Two passes over the frozen order: first `on_work` for every node, then
    /// `on_complete` for every node. Both passes go dependencies-first, so a
    /// dependency's work precedes its dependents' work, and its completion
    /// precedes theirs.
    ///
    /// # Panics
    /// If the graph is not initialized, or if a task callback panics.
    pub fn run_sequential(&mut self) {
        self.begin_run("run_sequential");
        let graph = &*self;
        let _span = debug_span!("run_sequential", nodes = graph.nodes.len()).entered();

        for &index in &graph.sorted_order {
            let node = &graph.nodes[index as usize];
            node.sched.advance(index, NodeState::Pending, NodeState::Ready);
            node.sched.advance(index, NodeState::Ready, NodeState::Running);
            trace!(node = index, "on_work");
            node.task.on_work(graph);
        }
        for &index in &graph.sorted_order {
            let node = &graph.nodes[index as usize];
            trace!(node = index, "on_complete");
            node.task.on_complete(graph);
            node.sched.advance(index, NodeState::Running, NodeState::Completed);
        }
    }

    /// Run the tasks on `pool`, starting each node as soon as all of its
    /// dependencies have completed, and block until every node has completed.
    ///
    /// Nodes without dependencies are submitted up front. A node's job calls
    /// `on_work` and then `on_complete`, after which it releases its
    /// dependents:
    /// - owned dependents (this node is their only dependency) are submitted
    ///   directly,
    /// - for shared dependents, a Release fence is issued and each counter is
    ///   decremented (Relaxed). If any counter reached zero, one Acquire fence
    ///   follows the whole batch before those dependents are submitted.
    ///
    /// This protocol ensures a dependent observes every effect of its
    /// dependencies' callbacks while independent nodes run concurrently.
    ///
    /// # Panics
    /// If the graph is not initialized, or if a task callback panics.
    pub fn run_parallel(&mut self, pool: &impl WorkerPool) {
        self.begin_run("run_parallel");
        let graph = &*self;
        let _span = debug_span!("run_parallel", nodes = graph.nodes.len()).entered();

        // Level 0 is exactly the set of nodes without dependencies, and it is
        // the prefix of the sorted order.
        let num_independent = graph
            .sorted_order
            .partition_point(|&idx| graph.nodes[idx as usize].level == Some(0));
        pool.in_scope(graph.root_job(&graph.sorted_order[..num_independent]));

        debug_assert!(
            graph
                .nodes
                .iter()
                .all(|node| node.sched.state() == NodeState::Completed),
            "TaskGraph::run_parallel: [1]"
        );
    }

    /// Check the graph is runnable and reset per-run counters and states.
    fn begin_run(&mut self, caller: &str) {
        assert_eq!(
            self.phase,
            GraphPhase::Ready,
            "TaskGraph::{caller} requires a successfully initialized graph"
        );
        for node in &mut self.nodes {
            node.sched.reset(node.dependencies.len());
        }
    }

    fn root_job<'env>(&'env self, roots: &'env [NodeIndex]) -> Job<'env> {
        Box::new(move |spawner: &dyn Spawner<'env>| {
            for &index in roots {
                self.submit(index, spawner);
            }
        })
    }

    /// Mark the node at `index` ready and hand its job to the pool.
    fn submit<'env>(&'env self, index: NodeIndex, spawner: &dyn Spawner<'env>) {
        self.nodes[index as usize]
            .sched
            .advance(index, NodeState::Pending, NodeState::Ready);
        spawner.spawn(Box::new(move |spawner: &dyn Spawner<'env>| {
            self.exec_node(index, spawner);
        }));
    }

    fn exec_node<'env>(&'env self, index: NodeIndex, spawner: &dyn Spawner<'env>) {
        let node = &self.nodes[index as usize];
        node.sched
            .advance(index, NodeState::Ready, NodeState::Running);
        trace!(node = index, "on_work");
        node.task.on_work(self);
        trace!(node = index, "on_complete");
        node.task.on_complete(self);
        node.sched
            .advance(index, NodeState::Running, NodeState::Completed);

        let mut ready = vec![];
        release_shared(
            &node.shared_dependents,
            |dependent| &self.nodes[dependent as usize].sched.remaining_deps,
            &mut ready,
        );
        for &dependent in ready.iter().chain(&node.owned_dependents) {
            self.submit(dependent, spawner);
        }
    }
}

/// Count one completed dependency for each of `dependents`, pushing those
/// whose last dependency this was onto `ready`.
///
/// A Release fence precedes the decrements. A single Acquire fence follows
/// all of them when at least one dependent became ready, so every decrement
/// that observed another dependency's release is covered by it.
fn release_shared<'a>(
    dependents: &[NodeIndex],
    remaining_deps: impl Fn(NodeIndex) -> &'a AtomicU32,
    ready: &mut Vec<NodeIndex>,
) {
    if dependents.is_empty() {
        return;
    }
    fence(Ordering::Release);
    let num_ready = ready.len();
    for &dependent in dependents {
        if remaining_deps(dependent).fetch_sub(1, Ordering::Relaxed) == 1 {
            ready.push(dependent);
        }
    }
    if ready.len() != num_ready {
        fence(Ordering::Acquire);
    }
}

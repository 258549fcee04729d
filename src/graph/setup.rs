use crate::{
    config::Config,
    graph::{GraphPhase, TaskGraph},
    task::Task,
    types::NodeIndex,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Error kind for graph initialization failures.
///
/// Currently indicates that the discovered dependency graph contains a cycle,
/// making it impossible to derive a valid execution order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskGraphError {
    /// The dependency graph contains a cycle.
    ///
    /// `path` lists node indexes along the cycle, each depending on the next.
    /// The first node is repeated at the end.
    #[error("dependency cycle detected: {}", display_path(.path))]
    Cycle {
        /// Node indexes forming the cycle.
        path: Vec<NodeIndex>,
    },
}

fn display_path(path: &[NodeIndex]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl<C: Config> TaskGraph<C> {
    /// Initialize every task and freeze the execution order by:
    /// - Invoking `on_init` on each node in index order, including nodes
    ///   appended while the walk is in progress,
    /// - Validating that no node can reach itself through its dependencies,
    /// - Assigning each node its level and sorting all nodes by level,
    /// - Materializing per-node dependent lists for the parallel scheduler.
    ///
    /// # Panics
    /// If called more than once, or from inside an `on_init` callback.
    ///
    /// # Errors
    /// In case the graph contains a cycle. The graph is then poisoned and must
    /// not be run.
    pub fn initialize(&mut self) -> Result<(), TaskGraphError> {
        assert_eq!(
            self.phase,
            GraphPhase::Building,
            "TaskGraph::initialize must be called exactly once"
        );
        self.phase = GraphPhase::Initializing;

        // Phase 1: Walk the nodes by index. `on_init` may append nodes through
        // `register`, so the length is re-read on every iteration and new nodes
        // are initialized by this same loop.
        let mut cursor = 0;
        while cursor < self.nodes.len() {
            let index = cursor.try_into().expect("TaskGraph::initialize: [1]");
            let task = self.nodes[cursor].task.clone();
            self.init_cursor = Some(index);
            trace!(node = index, "on_init");
            task.on_init(self);
            cursor += 1;
        }
        self.init_cursor = None;

        // Phase 2: Reject cycles. Levels are only well defined on a DAG.
        if let Some(path) = self.find_cycle() {
            warn!(cycle = %display_path(&path), "task graph contains a cycle");
            self.phase = GraphPhase::Poisoned;
            return Err(TaskGraphError::Cycle { path });
        }

        // Phase 3: Levels and the frozen order.
        self.assign_levels();
        self.sorted_order = (0..self.nodes.len())
            .map(|idx| idx.try_into().expect("TaskGraph::initialize: [2]"))
            .collect();
        // Stable sort: equal levels keep registration order.
        self.sorted_order
            .sort_by_key(|&idx| self.nodes[idx as usize].level);

        // Phase 4: Classify dependents for the parallel scheduler.
        self.link_dependents();
        self.phase = GraphPhase::Ready;

        debug!(
            nodes = self.nodes.len(),
            bands = self.independence_bands().count(),
            "task graph initialized"
        );
        Ok(())
    }

    /// Depth-first search over dependency edges with an explicit stack.
    ///
    /// A dependency that is still on the stack closes a cycle, which is
    /// returned as the slice of the stack from that dependency onwards.
    fn find_cycle(&self) -> Option<Vec<NodeIndex>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        // (node, position of the next dependency to visit)
        let mut stack: Vec<(NodeIndex, usize)> = vec![];

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            stack.push((root.try_into().expect("TaskGraph::find_cycle: [1]"), 0));

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let Some(&dep) = self.nodes[node as usize].dependencies.get_index(next) else {
                    marks[node as usize] = Mark::Done;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;
                match marks[dep as usize] {
                    Mark::Unvisited => {
                        marks[dep as usize] = Mark::OnStack;
                        stack.push((dep, 0));
                    }
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|&(idx, _)| idx == dep)
                            .expect("TaskGraph::find_cycle: [2]");
                        let mut path: Vec<_> = stack[start..].iter().map(|&(idx, _)| idx).collect();
                        path.push(dep);
                        return Some(path);
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    /// Memoized post-order walk computing
    /// `level(n) = 0` without dependencies, else `1 + max(level(dep))`.
    ///
    /// Must run on an acyclic graph.
    fn assign_levels(&mut self) {
        let mut levels: Vec<Option<u32>> = vec![None; self.nodes.len()];
        let mut stack: Vec<(NodeIndex, usize)> = vec![];

        for root in 0..self.nodes.len() {
            if levels[root].is_some() {
                continue;
            }
            stack.push((root.try_into().expect("TaskGraph::assign_levels: [1]"), 0));

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let dependencies = &self.nodes[node as usize].dependencies;
                if let Some(&dep) = dependencies.get_index(next) {
                    frame.1 += 1;
                    if levels[dep as usize].is_none() {
                        stack.push((dep, 0));
                    }
                    continue;
                }
                let level = dependencies
                    .iter()
                    .map(|&dep| {
                        levels[dep as usize]
                            .expect("TaskGraph::assign_levels: [2]")
                            .checked_add(1)
                            .expect("TaskGraph::assign_levels: [3]")
                    })
                    .max()
                    .unwrap_or(0);
                levels[node as usize] = Some(level);
                stack.pop();
            }
        }

        for (node, level) in self.nodes.iter_mut().zip(levels) {
            node.level = level;
        }
    }

    /// Fill `owned_dependents` / `shared_dependents` of every node and reset
    /// the per-run counters.
    ///
    /// An edge dependency -> dependent is "owned" iff the dependent has exactly
    /// one dependency. Dependent lists come out sorted because nodes are
    /// visited in index order.
    fn link_dependents(&mut self) {
        for dependent in 0..self.nodes.len() {
            let dependent_idx: NodeIndex = dependent
                .try_into()
                .expect("TaskGraph::link_dependents: [1]");
            let num_deps = self.nodes[dependent].dependencies.len();
            for dep_pos in 0..num_deps {
                let dep = *self.nodes[dependent]
                    .dependencies
                    .get_index(dep_pos)
                    .expect("TaskGraph::link_dependents: [2]");
                let dep_node = &mut self.nodes[dep as usize];
                if num_deps == 1 {
                    dep_node.owned_dependents.push(dependent_idx);
                } else {
                    dep_node.shared_dependents.push(dependent_idx);
                }
            }
        }
        for node in &mut self.nodes {
            node.sched.reset(node.dependencies.len());
        }
    }
}

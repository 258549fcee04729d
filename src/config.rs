use crate::task::Task;

/// Configuration entry-point for instantiating the task graph.
///
/// A concrete `Config` binds a specific `Task` implementation to the graph.
/// Hosts with heterogeneous participants bind `dyn Task<Self>`; hosts with a
/// single task type may bind it directly and skip dynamic dispatch.
pub trait Config: Sized + 'static {
    /// The task type that the graph registers, initializes and runs.
    type Task: ?Sized + Task<Self>;
}

use crate::{config::Config, graph::TaskGraph};
use core::{
    fmt,
    hash::{Hash, Hasher},
};
use derive_more::Deref;
use std::sync::Arc;

/// A single unit of work participating in the graph.
///
/// Every callback receives the graph that owns the node. Only `on_init` gets
/// mutable access, so registering new tasks is possible exclusively while the
/// graph is being initialized.
///
/// Tasks are shared between the caller and the graph (and across worker
/// threads in parallel mode), hence `&self` receivers: per-call state lives
/// behind interior mutability inside the task.
pub trait Task<C: Config>: Send + Sync {
    /// Called once, while the graph is being initialized.
    ///
    /// Any task registered through `graph.register(..)` from here becomes a
    /// dependency of this task. Newly discovered tasks are initialized later in
    /// the same pass.
    fn on_init(&self, graph: &mut TaskGraph<C>);
    /// Called once per run, after the work and completion callbacks of every
    /// dependency have returned.
    fn on_work(&self, graph: &TaskGraph<C>);
    /// Called once per run, after this task's own work has returned.
    fn on_complete(&self, graph: &TaskGraph<C>);
}

/// Identity of a task registered in a [`TaskGraph`].
///
/// Two handles are equal iff they point at the same shared allocation;
/// the task's value is never compared. Cloning a handle keeps its identity.
#[derive(Deref)]
#[deref(forward)]
pub struct TaskHandle<C: Config>(Arc<C::Task>);

impl<C: Config> TaskHandle<C> {
    /// Move `task` into a fresh shared allocation, creating a new identity.
    pub fn new(task: C::Task) -> Self
    where
        C::Task: Sized,
    {
        Self(Arc::new(task))
    }

    /// Shared task behind this handle.
    #[must_use]
    pub fn as_arc(&self) -> &Arc<C::Task> {
        &self.0
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl<C: Config> From<Arc<C::Task>> for TaskHandle<C> {
    fn from(task: Arc<C::Task>) -> Self {
        Self(task)
    }
}

impl<C: Config> Clone for TaskHandle<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C: Config> PartialEq for TaskHandle<C> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.addr(), other.addr())
    }
}

impl<C: Config> Eq for TaskHandle<C> {}

impl<C: Config> Hash for TaskHandle<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<C: Config> fmt::Debug for TaskHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.addr()).finish()
    }
}

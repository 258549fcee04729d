//! Submit-and-wait worker-pool capability.
//!
//! The parallel scheduler never spawns threads itself. It hands a root job to
//! a [`WorkerPool`], and jobs submit follow-up jobs through the [`Spawner`]
//! they are given. The pool returns from [`WorkerPool::in_scope`] only after
//! every job submitted this way has finished.

/// Independent unit of work submitted to a [`WorkerPool`].
///
/// The job receives a spawner so that it can submit further jobs into the
/// same scope. It may borrow anything that outlives `'env`.
pub type Job<'env> = Box<dyn FnOnce(&dyn Spawner<'env>) + Send + 'env>;

/// Submission side of a running [`WorkerPool`] scope.
pub trait Spawner<'env> {
    /// Queue `job` for execution. It may run on any worker thread, at any time
    /// before the enclosing scope returns.
    fn spawn(&self, job: Job<'env>);
}

/// Worker pool able to run independent jobs and wait for all of them.
pub trait WorkerPool {
    /// Run `root` and every job transitively spawned from it, returning once
    /// all of them have finished.
    ///
    /// A panic inside any job is propagated to the caller after the scope
    /// has drained.
    fn in_scope<'env>(&self, root: Job<'env>);
}

/// Rayon's global thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalPool;

impl WorkerPool for GlobalPool {
    fn in_scope<'env>(&self, root: Job<'env>) {
        rayon::scope(|scope| root(&RayonSpawner(scope)));
    }
}

impl WorkerPool for rayon::ThreadPool {
    fn in_scope<'env>(&self, root: Job<'env>) {
        self.scope(|scope| root(&RayonSpawner(scope)));
    }
}

struct RayonSpawner<'a, 'env>(&'a rayon::Scope<'env>);

impl<'env> Spawner<'env> for RayonSpawner<'_, 'env> {
    fn spawn(&self, job: Job<'env>) {
        self.0.spawn(move |scope| job(&RayonSpawner(scope)));
    }
}

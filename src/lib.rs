//! Dynamically built task dependency graph with sequential and parallel
//! schedulers.
//!
//! This crate provides the dependency graph that sits beneath a job system.
//! It:
//! - Lets tasks declare dependencies on other tasks *while they are being
//!   initialized*: a task's `on_init` callback may register further tasks,
//!   which are appended to the graph and initialized in the same pass.
//! - Rejects dependency cycles once the node set stops growing.
//! - Assigns every node a level (longest dependency chain down to a leaf) and
//!   freezes a stable order sorted by level. Nodes sharing a level form an
//!   independence band and never depend on each other.
//! - Runs the frozen graph either single-threaded or on a worker pool, where a
//!   node is submitted the moment its last dependency completes.
//!
//! Key modules:
//! - `config`: binds a concrete task type to the graph via the `Config`
//!   trait.
//! - `task`: defines the `Task` capability and the identity-based
//!   `TaskHandle`.
//! - `graph`: node registry, initialization, leveling and both executors.
//! - `pool`: the submit-and-wait capability the parallel scheduler consumes,
//!   with rayon-backed implementations.
//! - `types`: common aliases shared across the crate.
//!
//! Quick start:
//! 1. Implement `Config` with your `Task` type (or `dyn Task<Self>`).
//! 2. Implement `Task::on_init` to register dependencies via
//!    `TaskGraph::register`, then `on_work` and `on_complete`.
//! 3. Register the root tasks, call `TaskGraph::initialize`, then
//!    `run_sequential` or `run_parallel` as many times as needed.
//!
//! For every edge "N depends on D" the graph guarantees that D's work
//! callback happens-before N's, and D's completion callback happens-before
//! N's. The sequential executor runs all work callbacks before the first
//! completion callback; the parallel scheduler completes D before N starts.

/// Public interface to configure the task graph.
///
/// Exposes the `Config` trait which binds the task type for a concrete
/// instantiation of the graph.
pub mod config;
/// The task dependency graph.
///
/// Contains node registration, the initialization driver (dynamic growth,
/// cycle validation, leveling, ordering) and the sequential and parallel
/// executors.
pub mod graph;
/// Worker-pool capability consumed by the parallel scheduler.
pub mod pool;
mod sync;
/// Task capability and identity handle.
///
/// Defines the `Task` trait (`on_init`, `on_work`, `on_complete`) and
/// `TaskHandle`, which compares and hashes by identity of the shared task.
pub mod task;
/// Core types used across the crate (node indices, hashing aliases).
pub mod types;

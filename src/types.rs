use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap as _HashMap;

/// Dense index of a node in the graph.
///
/// Indices are assigned in registration order starting from zero and are
/// never reused while the graph is alive.
pub type NodeIndex = u32;

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;

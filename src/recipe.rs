//! Per-invocation recipe state.
//!
//! A [`Recipe`] is created by the scheduler on first reference to a target
//! and lives exactly as long as the scheduler that created it (see
//! DESIGN.md's note on cyclic references: the scheduler is the sole owner,
//! `waiting`/`ready_queue` only ever hold target names, never a second
//! owning handle).

use std::collections::BTreeSet;

use crate::hash::{hash_bytes, Hash};

/// Lifecycle states. Transitions: `Pending -> Running -> (Suspended <->
/// Running) -> {Complete, Failed}`. No recipe is ever `Running` and
/// `Complete` simultaneously.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    Pending,
    Running,
    Suspended,
    Complete,
    Failed,
}

/// One recipe's runtime state for a single build invocation.
#[derive(Clone, Debug)]
pub struct Recipe {
    pub target_name: String,
    pub state: State,
    pub request_key: Hash,
    pub declared_deps: BTreeSet<String>,
    pub pending_deps: BTreeSet<String>,
    pub output_dir: Option<String>,
    pub temp_dir: Option<String>,
    pub start_time_ms: u64,
}

impl Recipe {
    /// A fresh, `Pending` recipe for `target_name` with empty dependency
    /// sets and an all-zero placeholder request key (overwritten by
    /// [`Recipe::compute_request_key`] during the scheduler's cache check).
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            state: State::Pending,
            request_key: Hash::ZERO,
            declared_deps: BTreeSet::new(),
            pending_deps: BTreeSet::new(),
            output_dir: None,
            temp_dir: None,
            start_time_ms: 0,
        }
    }

    /// Record a dependency. Idempotent: inserting an already-declared
    /// dependency is a no-op (`declared_deps`/`pending_deps` are sets).
    pub fn add_dependency(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.declared_deps.insert(path.clone());
        self.pending_deps.insert(path);
    }

    pub fn has_dependency(&self, path: &str) -> bool {
        self.declared_deps.contains(path)
    }

    pub fn set_output_dir(&mut self, dir: impl Into<String>) {
        self.output_dir = Some(dir.into());
    }

    pub fn set_temp_dir(&mut self, dir: impl Into<String>) {
        self.temp_dir = Some(dir.into());
    }

    /// Derive this recipe's request key from its recipe-body hash, its
    /// target name, and its declared dependencies.
    ///
    /// Central determinism contract: the same recipe body, target, and
    /// declared-dependency *set* always yields the same key regardless of
    /// the order dependencies were declared in, because `combine` is
    /// commutative and the deps are sorted before being folded in (sorting
    /// is what collapses "insertion order" down to "set", not the combine
    /// operation itself — XOR alone can't do that).
    pub fn compute_request_key(&mut self, recipe_body_hash: Hash) -> Hash {
        let mut key = recipe_body_hash;
        key.combine(&hash_bytes(self.target_name.as_bytes()));

        let mut deps: Vec<&String> = self.declared_deps.iter().collect();
        deps.sort();
        for dep in deps {
            key.combine(&hash_bytes(dep.as_bytes()));
        }

        self.request_key = key;
        key
    }
}

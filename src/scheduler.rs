//! The cooperative recipe scheduler — the heart of the engine.
//!
//! Single-threaded, as spec.md §5 requires: all state below lives in one
//! [`Scheduler`], the ready queue drains serially, and a recipe may only
//! suspend inside [`SchedulerCore::on_depend_request`]. The design
//! deliberately admits a later parallel-worker upgrade (spec.md §9) —
//! none of the public contract here would need to change, only the drain
//! loop — but that upgrade is out of scope for this crate.
//!
//! [`Scheduler`] is split into `provider: P` and `core: SchedulerCore` so
//! that a running recipe body can hold `&mut SchedulerCore` (via
//! [`crate::provider::RecipeContext`]) while the scheduler itself still
//! holds `&mut self.provider` for the `invoke` call — two disjoint field
//! borrows, no interior mutability or unsafe aliasing required. `core` is
//! the only place a [`Recipe`] is ever owned; `waiting` and `ready_queue`
//! hold target-name keys into it, never a second owning handle, resolving
//! the cyclic-ownership question the original C scheduler answered with
//! raw pointers (see DESIGN.md).

use std::{
    collections::{HashMap, VecDeque},
    fs,
    process::{Command, Stdio},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    error::Error,
    hash::{hash_tree, Hash},
    provider::{InvokeOutcome, RecipeContext, RecipeProvider, SysResult},
    recipe::{Recipe, State},
    registry::Registry,
    store::Store,
    trace::Trace,
};

/// Everything about a build run except the provider itself. Borrowed
/// mutably by [`RecipeContext`] while a recipe body is executing.
pub struct SchedulerCore {
    store: Store,
    registry: Registry,
    recipes: HashMap<String, Recipe>,
    completed: HashMap<String, String>,
    waiting: HashMap<String, Vec<String>>,
    ready_queue: VecDeque<String>,
    active_count: i64,
    failed: bool,
    target_error: Option<String>,
}

pub struct Scheduler<P> {
    core: SchedulerCore,
    provider: P,
}

impl<P: RecipeProvider> Scheduler<P> {
    /// Create a scheduler, registering every target the provider knows
    /// about. Registration happens exactly once, before any recipe runs.
    #[instrument(skip_all)]
    pub fn create(store: Store, provider: P) -> Self {
        let mut registry = Registry::new();
        provider.register_targets(&mut registry);
        Self {
            core: SchedulerCore {
                store,
                registry,
                recipes: HashMap::new(),
                completed: HashMap::new(),
                waiting: HashMap::new(),
                ready_queue: VecDeque::new(),
                active_count: 0,
                failed: false,
                target_error: None,
            },
            provider,
        }
    }

    pub fn completed(&self) -> &HashMap<String, String> {
        &self.core.completed
    }

    pub fn failed(&self) -> bool {
        self.core.failed
    }

    pub fn target_error(&self) -> Option<&str> {
        self.core.target_error.as_deref()
    }

    /// Build `target`: get-or-create its recipe, enqueue it, and drain.
    ///
    /// The cache check happens inside [`Scheduler::run`]'s drain loop, not
    /// here, so that targets discovered only as someone else's dependency
    /// (never passed to `build` directly) get the same cache check before
    /// they run — and, just as importantly, get their `request_key`
    /// computed before [`SchedulerCore::on_complete`] saves their trace.
    #[instrument(skip(self))]
    pub fn build(&mut self, target: &str) -> Result<(), Error> {
        if !self.core.registry.has(target) {
            return Err(Error::Parse {
                message: format!("unknown target: {target}"),
            });
        }

        self.core.get_or_create_recipe(target);
        self.core.ready_queue.push_back(target.to_string());
        self.run()
    }

    /// Drain the ready queue until empty or a failure is recorded.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.core.failed {
            let Some(target) = self.core.ready_queue.pop_front() else {
                break;
            };
            let is_complete = self
                .core
                .recipes
                .get(&target)
                .is_some_and(|r| r.state == State::Complete);
            if is_complete {
                continue;
            }
            if self.check_cache(&target) {
                continue;
            }
            self.execute(&target);
        }

        if self.core.failed {
            Err(Error::Exec {
                target: self.core.target_error.clone().unwrap_or_default(),
            })
        } else {
            Ok(())
        }
    }

    /// Compute the request key, attempt a trace load+validate. On a hit,
    /// mark `Complete` and record the output path; returns whether it hit.
    ///
    /// Folds in `self.provider.known_deps` before computing the key: a
    /// brand-new `Recipe` has an empty `declared_deps`, and the only other
    /// place deps get declared is inside `invoke` — so without this,
    /// `check_cache` could never compute the same key a trace was saved
    /// under for any recipe that doesn't suspend (see DESIGN.md).
    #[instrument(skip(self))]
    fn check_cache(&mut self, target: &str) -> bool {
        let body_identifier = match self.core.registry.get(target) {
            Some(d) => d.body_identifier.clone(),
            None => return false,
        };
        let body_hash = match self.provider.body_hash(&body_identifier) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let known_deps = self.provider.known_deps(&body_identifier);

        let key = {
            let recipe = self.core.get_or_create_recipe(target);
            for dep in known_deps {
                recipe.add_dependency(dep);
            }
            recipe.compute_request_key(body_hash)
        };

        match Trace::load(&key, &self.core.store) {
            Ok(trace) if trace.validate() => {
                let output_dir = format!("outputs/{target}");
                if let Some(recipe) = self.core.recipes.get_mut(target) {
                    recipe.state = State::Complete;
                    recipe.set_output_dir(output_dir.clone());
                }
                self.core.completed.insert(target.to_string(), output_dir);
                info!(target, "cache hit");
                true
            }
            Ok(_) => {
                debug!(target, "cache entry present but invalid");
                false
            }
            Err(_) => {
                debug!(target, "cache miss");
                false
            }
        }
    }

    /// Run a ready recipe to its next suspension point.
    #[instrument(skip(self))]
    fn execute(&mut self, target: &str) {
        let body_identifier = match self.core.registry.get(target) {
            Some(d) => d.body_identifier.clone(),
            None => {
                self.core.on_complete(target, false);
                return;
            }
        };

        let output_dir = format!("outputs/{target}");
        let temp_dir = match self.core.store.scratch_dir(target) {
            Ok(dir) => dir.to_string_lossy().into_owned(),
            Err(err) => {
                warn!(target, %err, "failed to allocate scratch directory");
                self.core.on_complete(target, false);
                return;
            }
        };
        if let Err(err) = fs::create_dir_all(&output_dir) {
            warn!(target, %err, "failed to create output directory");
            self.core.on_complete(target, false);
            return;
        }

        {
            let recipe = self.core.get_or_create_recipe(target);
            recipe.state = State::Running;
            recipe.start_time_ms = now_ms();
            recipe.set_output_dir(output_dir);
            recipe.set_temp_dir(temp_dir);
        }
        self.core.active_count += 1;

        let mut ctx = RecipeContext {
            core: &mut self.core,
            current_target: target.to_string(),
        };
        // Disjoint field borrows: `self.provider` and `self.core` (captured
        // inside `ctx`) are independent, so this needs no unsafe code.
        let outcome = self.provider.invoke(&body_identifier, &mut ctx);

        match outcome {
            Ok(InvokeOutcome::Done) => {
                // `declared_deps` only reaches its final set once the body
                // runs to completion without suspending again; recompute
                // the key now so the trace `on_complete` saves is keyed on
                // the complete dependency set, not whatever partial set
                // existed at the last `check_cache` call.
                if let Ok(body_hash) = self.provider.body_hash(&body_identifier) {
                    if let Some(recipe) = self.core.recipes.get_mut(target) {
                        recipe.compute_request_key(body_hash);
                    }
                }
                self.core.on_complete(target, true);
            }
            Ok(InvokeOutcome::Suspended) => {
                // State transition already happened inside
                // `on_depend_request`. `active_count` only tracks recipes
                // currently running their body, so it drops back down here
                // too, not just on completion.
                self.core.active_count -= 1;
            }
            Ok(InvokeOutcome::Failed(message)) => {
                warn!(target, %message, "recipe body reported failure");
                self.core.on_complete(target, false);
            }
            Err(err) => {
                warn!(target, %err, "recipe provider error");
                self.core.on_complete(target, false);
            }
        }
    }
}

impl SchedulerCore {
    fn get_or_create_recipe(&mut self, target: &str) -> &mut Recipe {
        self.recipes
            .entry(target.to_string())
            .or_insert_with(|| Recipe::new(target))
    }

    pub(crate) fn output_dir(&self, target: &str) -> Option<&str> {
        self.recipes.get(target)?.output_dir.as_deref()
    }

    pub(crate) fn temp_dir(&self, target: &str) -> Option<&str> {
        self.recipes.get(target)?.temp_dir.as_deref()
    }

    /// Called from [`RecipeContext::depend_on`]. Returns `None` as the
    /// suspend sentinel the provider must honor by not continuing the
    /// recipe body.
    pub(crate) fn on_depend_request(&mut self, recipe_target: &str, dep_target: &str) -> Option<String> {
        {
            let recipe = self.get_or_create_recipe(recipe_target);
            recipe.add_dependency(dep_target);
        }

        if let Some(output) = self.completed.get(dep_target).cloned() {
            if let Some(recipe) = self.recipes.get_mut(recipe_target) {
                recipe.pending_deps.remove(dep_target);
            }
            return Some(output);
        }

        let dep_state = self.get_or_create_recipe(dep_target).state;
        if dep_state == State::Complete {
            // `completed` and `Complete` are always set together in
            // `on_complete`/`check_cache`; reaching here with a stale
            // `completed` miss would be a bug elsewhere, but fall back to
            // the registered output path defensively rather than panic.
            let output = self.completed.get(dep_target).cloned().unwrap_or_default();
            return Some(output);
        }

        if let Some(recipe) = self.recipes.get_mut(recipe_target) {
            recipe.state = State::Suspended;
        }
        self.waiting
            .entry(dep_target.to_string())
            .or_default()
            .push(recipe_target.to_string());
        debug!(recipe_target, dep_target, "suspended waiting for dependency");

        if dep_state == State::Pending {
            self.ready_queue.push_back(dep_target.to_string());
        }

        None
    }

    /// Called from [`RecipeContext::register_dep`].
    pub(crate) fn register_dep(&mut self, recipe_target: &str, path: &str) {
        let recipe = self.get_or_create_recipe(recipe_target);
        recipe.add_dependency(path);
        // A registered file dependency is never itself a recipe: it's
        // already resolved, so it never contributes to pending_deps.
        recipe.pending_deps.remove(path);
    }

    /// Called from [`RecipeContext::sys`].
    pub(crate) fn on_sys(&mut self, recipe_target: &str, argv: &[String]) -> SysResult {
        let Some((program, args)) = argv.split_first() else {
            return SysResult {
                exit_code: -1,
                stdout: Vec::new(),
                stderr: Vec::new(),
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(recipe) = self.recipes.get(recipe_target) {
            if let Some(dir) = &recipe.temp_dir {
                cmd.current_dir(dir);
            }
        }

        match cmd.output() {
            Ok(output) => SysResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(err) => {
                warn!(recipe_target, program = ?program, %err, "failed to spawn subprocess");
                SysResult {
                    exit_code: -1,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }
            }
        }
    }

    /// Resume a suspended recipe: `Suspended -> Pending`, push onto the
    /// ready queue. The recipe re-requests `depend_on` on its next
    /// execution attempt and gets an immediate hit via `completed`.
    fn resume_recipe(&mut self, target: &str) {
        if let Some(recipe) = self.recipes.get_mut(target) {
            recipe.state = State::Pending;
        }
        self.ready_queue.push_back(target.to_string());
        debug!(target, "resumed");
    }

    #[instrument(skip(self))]
    fn on_complete(&mut self, target: &str, success: bool) {
        self.active_count -= 1;

        let (start_time_ms, declared_deps, output_dir) = match self.recipes.get(target) {
            Some(r) => (
                r.start_time_ms,
                r.declared_deps.clone(),
                r.output_dir.clone().unwrap_or_else(|| format!("outputs/{target}")),
            ),
            None => return,
        };
        let wall_time_ms = now_ms().saturating_sub(start_time_ms);
        // No portable, dependency-free way to measure CPU time per recipe;
        // approximate it with wall time (documented simplification, see
        // DESIGN.md).
        let cpu_time_ms = wall_time_ms;

        if success {
            if let Some(recipe) = self.recipes.get_mut(target) {
                recipe.state = State::Complete;
            }

            let deps = declared_deps
                .iter()
                .map(|dep| {
                    let path = self.completed.get(dep).cloned().unwrap_or_else(|| dep.clone());
                    let hash = hash_dep(&path);
                    (path, hash)
                })
                .collect();

            let request_key = self
                .recipes
                .get(target)
                .map(|r| r.request_key)
                .unwrap_or(Hash::ZERO);
            let output_tree_hash = hash_tree(std::path::Path::new(&output_dir)).unwrap_or(Hash::ZERO);

            let trace = Trace {
                request_key,
                deps,
                output_tree_hash,
                cpu_time_ms,
                wall_time_ms,
            };
            if let Err(err) = trace.save(&self.store) {
                warn!(target, %err, "failed to save trace (non-fatal)");
            }

            self.completed.insert(target.to_string(), output_dir);
            info!(target, "build complete");

            if let Some(waiters) = self.waiting.remove(target) {
                for waiter in waiters {
                    self.resume_recipe(&waiter);
                }
            }
        } else {
            if let Some(recipe) = self.recipes.get_mut(target) {
                recipe.state = State::Failed;
            }
            self.failed = true;
            self.target_error = Some(target.to_string());
            warn!(target, "build failed");
        }
    }
}

fn hash_dep(path: &str) -> Hash {
    let p = std::path::Path::new(path);
    match fs::symlink_metadata(p) {
        Ok(m) if m.is_dir() => hash_tree(p).unwrap_or(Hash::ZERO),
        Ok(_) => crate::hash::hash_file(p).unwrap_or(Hash::ZERO),
        Err(_) => Hash::ZERO,
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

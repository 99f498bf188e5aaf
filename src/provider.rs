//! The abstract contract a recipe source (normally a scripting host) must
//! implement to plug into the scheduler.
//!
//! The scheduler owns the "current recipe" context for the duration of one
//! [`RecipeProvider::invoke`] call by handing the provider a [`RecipeContext`]
//! borrowed from its [`crate::scheduler::SchedulerCore`] — no thread-local or
//! process-global pointer, unlike the global `g_current_registry` the
//! original C project used while loading `BUILD.um` files (see DESIGN.md).

use std::path::Path;

use crate::{hash::Hash, registry::Registry, scheduler::SchedulerCore};

pub mod toml;

/// What happened when a recipe body ran to its next suspension point.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The recipe body ran to completion successfully.
    Done,
    /// The recipe body requested a dependency that wasn't ready and
    /// suspended; the scheduler has already recorded the suspension.
    Suspended,
    /// The recipe body reported failure (e.g. a subprocess exited non-zero).
    Failed(String),
}

/// The result of a subprocess spawned via [`RecipeContext::sys`].
#[derive(Debug, Clone)]
pub struct SysResult {
    /// `-1` on spawn failure or abnormal termination.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The contract a recipe source implements.
///
/// Loading (parsing `BUILD.<ext>` files, discovering the source tree) is
/// provider-specific and happens before a provider is handed to the
/// scheduler; it is not part of this trait, since it produces `Self` rather
/// than operating on an existing one. See [`toml::TomlProvider::load`] for
/// the reference implementation's loader.
///
/// [`crate::scheduler::Scheduler`] is generic over `P: RecipeProvider`
/// rather than holding a `dyn RecipeProvider` — this crate only ever has one
/// concrete provider live at a time, so the static dispatch costs nothing
/// and avoids a vtable for a trait with no real need for dynamic dispatch.
pub trait RecipeProvider {
    /// Register every target this provider knows how to build into
    /// `registry`. Called once, before any recipe runs.
    fn register_targets(&self, registry: &mut Registry);

    /// The content hash of a recipe body, used to seed its request key.
    /// A provider that can't distinguish bodies (e.g. one backed by a
    /// single monolithic script) may return a constant here, but per
    /// spec.md §9 that degrades the cache to a name-only cache — real
    /// providers should hash the actual body content.
    fn body_hash(&self, body_identifier: &str) -> color_eyre::Result<Hash>;

    /// Every dependency (file path or target name) this recipe is already
    /// known to declare, without running its body.
    ///
    /// The cache check needs a recipe's full dependency set to compute the
    /// same request key the trace was saved under, but dependencies are
    /// normally only discovered by running the body — which is exactly the
    /// work the cache exists to skip. A provider whose recipe definitions
    /// are fully known upfront (as `provider::toml`'s are: `deps` and
    /// `inputs` come straight out of the parsed `BUILD.toml`) should return
    /// its complete dependency set here so `check_cache` can fold it in
    /// before ever invoking the body. The default returns nothing, which
    /// is correct but means the body must actually run once per process
    /// before its trace can be found again (the recipe only accumulates
    /// `declared_deps` by being invoked). Over-reporting a dependency here
    /// that the body doesn't end up declaring just changes the request key;
    /// under-reporting is always safe, since `execute` recomputes the key
    /// from the final `declared_deps` before saving.
    fn known_deps(&self, _body_identifier: &str) -> Vec<String> {
        Vec::new()
    }

    /// Drive the recipe body named by `body_identifier` to its next
    /// suspension point, routing all host calls through `ctx`.
    fn invoke(
        &mut self,
        body_identifier: &str,
        ctx: &mut RecipeContext<'_>,
    ) -> color_eyre::Result<InvokeOutcome>;
}

/// The host callbacks exposed to a recipe body during one [`RecipeProvider::invoke`]
/// call, scoped to a single current target.
pub struct RecipeContext<'a> {
    pub(crate) core: &'a mut SchedulerCore,
    pub(crate) current_target: String,
}

impl<'a> RecipeContext<'a> {
    /// Request a dependency. `None` is the suspend sentinel: the caller must
    /// stop executing the recipe body and return [`InvokeOutcome::Suspended`].
    pub fn depend_on(&mut self, target: &str) -> Option<String> {
        self.core.on_depend_request(&self.current_target, target)
    }

    /// Spawn a subprocess in the recipe's temp directory.
    pub fn sys(&mut self, argv: &[String]) -> SysResult {
        self.core.on_sys(&self.current_target, argv)
    }

    /// Imperatively record an input-file dependency.
    pub fn register_dep(&mut self, path: &str) {
        self.core.register_dep(&self.current_target, path);
    }

    /// The scratch output directory allocated for the current target.
    pub fn output_dir(&self) -> Option<&str> {
        self.core.output_dir(&self.current_target)
    }

    /// The scratch temp directory allocated for the current target.
    pub fn temp_dir(&self) -> Option<&str> {
        self.core.temp_dir(&self.current_target)
    }

    /// Filesystem glob with tilde expansion; directories are marked with a
    /// trailing slash, matching the ABI in spec.md §6.
    pub fn glob(&mut self, pattern: &str) -> Vec<String> {
        crate::glob::glob(pattern)
    }

    /// Hash a file, returning its 64-char hex digest.
    pub fn hash_file(&self, path: &Path) -> Option<String> {
        crate::hash::hash_file(path).ok().map(|h| h.hex())
    }

    pub fn log_info(&self, msg: &str) {
        tracing::info!(target: "recipe", "{msg}");
    }

    pub fn log_debug(&self, msg: &str) {
        tracing::debug!(target: "recipe", "{msg}");
    }
}

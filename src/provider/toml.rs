//! A declarative `BUILD.toml` recipe provider.
//!
//! The original project's recipe bodies were UMKA scripts (a small embedded
//! scripting language) loaded from `BUILD.um` files, each registering
//! arbitrary imperative targets. This crate's non-goals exclude embedding a
//! scripting host, so this module stands in a declarative format instead:
//! each recipe lists its dependencies and an optional shell command,
//! expanded with a handful of `$VAR` substitutions. It exercises the full
//! [`crate::provider::RecipeProvider`] contract (dependency suspension,
//! globbing, subprocess spawning, file-dep registration) without requiring
//! a language runtime.
//!
//! ```toml
//! [recipes.hello]
//! cmd = "cp $SRC/hello.txt $OUT/hello.txt"
//! inputs = ["src/hello.txt"]
//!
//! [recipes.all]
//! deps = ["hello"]
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use color_eyre::eyre::{eyre, Context};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    hash::{hash_bytes, Hash},
    provider::{InvokeOutcome, RecipeContext, RecipeProvider},
    registry::Registry,
};

/// One `[recipes.<name>]` table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecipeDef {
    /// Other targets, or literal file paths, this recipe depends on.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Glob patterns resolved and registered as file dependencies before
    /// `cmd` runs.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// A shell-style command line, split with [`shlex`]. Absent for
    /// aggregator recipes that only exist to depend on other targets.
    pub cmd: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct BuildFile {
    #[serde(default)]
    recipes: BTreeMap<String, RecipeDef>,
}

/// The reference provider: a single parsed `BUILD.toml`.
#[derive(Clone, Debug)]
pub struct TomlProvider {
    source_dir: std::path::PathBuf,
    recipes: BTreeMap<String, RecipeDef>,
}

impl TomlProvider {
    /// Parse `path` (typically `BUILD.toml`) into a provider. `source_dir`
    /// is the directory relative-path substitutions like `$SRC` resolve
    /// against — normally the file's parent directory.
    #[instrument]
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build file {}", path.display()))?;
        let file: BuildFile = toml::from_str(&text)
            .with_context(|| format!("parsing build file {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        Ok(Self {
            source_dir,
            recipes: file.recipes,
        })
    }

    /// Substitute `$SRC` only. The part of `resolve` that's known before a
    /// recipe ever runs (no `output_dir`/`temp_dir` allocated yet), used by
    /// [`TomlProvider::known_deps`] to glob `inputs` ahead of execution.
    fn resolve_static(&self, text: &str) -> String {
        text.replace("$SRC", &self.source_dir.to_string_lossy())
    }

    fn resolve(&self, ctx: &mut RecipeContext<'_>, text: &str) -> String {
        let mut out = self.resolve_static(text);
        if let Some(dir) = ctx.output_dir() {
            out = out.replace("$OUT", dir);
        }
        if let Some(dir) = ctx.temp_dir() {
            out = out.replace("$TMP", dir);
        }
        out
    }
}

impl RecipeProvider for TomlProvider {
    fn register_targets(&self, registry: &mut Registry) {
        for name in self.recipes.keys() {
            registry.register(name.clone(), name.clone());
        }
    }

    fn body_hash(&self, body_identifier: &str) -> color_eyre::Result<Hash> {
        let def = self
            .recipes
            .get(body_identifier)
            .ok_or_else(|| eyre!("no such recipe: {body_identifier}"))?;
        let canonical = toml::to_string(def).with_context(|| "serializing recipe body for hashing")?;
        Ok(hash_bytes(canonical.as_bytes()))
    }

    /// `deps` and glob-expanded `inputs` are both fully known from the
    /// parsed `BUILD.toml` — unlike an imperative recipe body, nothing here
    /// needs to run first. Returning them lets `check_cache` compute the
    /// real request key (and get real cache hits) before ever invoking.
    fn known_deps(&self, body_identifier: &str) -> Vec<String> {
        let Some(def) = self.recipes.get(body_identifier) else {
            return Vec::new();
        };
        let mut deps = def.deps.clone();
        for pattern in &def.inputs {
            let resolved = self.resolve_static(pattern);
            deps.extend(crate::glob::glob(&resolved));
        }
        deps
    }

    #[instrument(skip(self, ctx))]
    fn invoke(
        &mut self,
        body_identifier: &str,
        ctx: &mut RecipeContext<'_>,
    ) -> color_eyre::Result<InvokeOutcome> {
        let def = self
            .recipes
            .get(body_identifier)
            .ok_or_else(|| eyre!("no such recipe: {body_identifier}"))?
            .clone();

        // Re-run from scratch on every resumption: already-resolved deps
        // hit `completed` immediately and cost only a hashmap lookup, so
        // this recipe body carries no continuation state of its own. See
        // DESIGN.md's note on the suspend/resume replay strategy.
        for dep in &def.deps {
            if ctx.depend_on(dep).is_none() {
                return Ok(InvokeOutcome::Suspended);
            }
        }

        for pattern in &def.inputs {
            let resolved = self.resolve(ctx, pattern);
            let matches = ctx.glob(&resolved);
            if matches.is_empty() {
                warn!(pattern = %resolved, "input glob matched nothing");
            }
            for m in matches {
                ctx.register_dep(&m);
            }
        }

        let Some(cmd) = &def.cmd else {
            return Ok(InvokeOutcome::Done);
        };
        let expanded = self.resolve(ctx, cmd);
        let argv: Vec<String> = shlex::split(&expanded)
            .ok_or_else(|| eyre!("could not parse command line: {expanded}"))?;
        if argv.is_empty() {
            return Ok(InvokeOutcome::Done);
        }

        let result = ctx.sys(&argv);
        if result.exit_code != 0 {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            return Ok(InvokeOutcome::Failed(format!(
                "`{expanded}` exited with code {}: {stderr}",
                result.exit_code
            )));
        }
        Ok(InvokeOutcome::Done)
    }
}

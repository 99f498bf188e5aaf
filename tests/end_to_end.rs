//! Full scheduler scenarios, driven through a small in-test `RecipeProvider`
//! rather than the `BUILD.toml` reference provider — this gives each test
//! precise control over suspension, failure, and invocation counts without
//! going through the filesystem-backed format.

use std::{cell::RefCell, collections::HashMap, fs, rc::Rc};

use pretty_assertions::assert_eq;
use rebuild::{
    hash::hash_bytes,
    provider::{InvokeOutcome, RecipeContext, RecipeProvider},
    recipe::Recipe,
    registry::Registry,
    trace::Trace,
    Hash, Scheduler, Store,
};

#[derive(Clone, Debug, Default)]
struct TargetDef {
    file_deps: Vec<String>,
    target_deps: Vec<String>,
    fail: bool,
}

#[derive(Clone, Default)]
struct FakeProvider {
    defs: HashMap<String, TargetDef>,
    invocations: Rc<RefCell<HashMap<String, u32>>>,
}

impl FakeProvider {
    fn with(mut self, name: &str, def: TargetDef) -> Self {
        self.defs.insert(name.to_string(), def);
        self
    }

    fn invocations_of(&self, name: &str) -> u32 {
        *self.invocations.borrow().get(name).unwrap_or(&0)
    }
}

impl RecipeProvider for FakeProvider {
    fn register_targets(&self, registry: &mut Registry) {
        for name in self.defs.keys() {
            registry.register(name.clone(), name.clone());
        }
    }

    fn body_hash(&self, body_identifier: &str) -> color_eyre::Result<Hash> {
        let def = self.defs.get(body_identifier).expect("known target in test fixture");
        let mut file_deps = def.file_deps.clone();
        file_deps.sort();
        let mut target_deps = def.target_deps.clone();
        target_deps.sort();
        let canonical = format!("{file_deps:?}{target_deps:?}{}", def.fail);
        Ok(hash_bytes(canonical.as_bytes()))
    }

    fn known_deps(&self, body_identifier: &str) -> Vec<String> {
        let Some(def) = self.defs.get(body_identifier) else {
            return Vec::new();
        };
        let mut deps = def.file_deps.clone();
        deps.extend(def.target_deps.clone());
        deps
    }

    fn invoke(
        &mut self,
        body_identifier: &str,
        ctx: &mut RecipeContext<'_>,
    ) -> color_eyre::Result<InvokeOutcome> {
        *self
            .invocations
            .borrow_mut()
            .entry(body_identifier.to_string())
            .or_insert(0) += 1;

        let def = self
            .defs
            .get(body_identifier)
            .cloned()
            .expect("known target in test fixture");

        for dep in &def.target_deps {
            if ctx.depend_on(dep).is_none() {
                return Ok(InvokeOutcome::Suspended);
            }
        }
        for path in &def.file_deps {
            ctx.register_dep(path);
        }
        if def.fail {
            return Ok(InvokeOutcome::Failed("boom".to_string()));
        }
        Ok(InvokeOutcome::Done)
    }
}

/// Scenario 1: single recipe, clean build. The saved trace has the exact
/// shape spec.md describes: one dependency, matching path, and it validates.
#[test]
fn clean_build_produces_a_valid_single_dep_trace() {
    let workdir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let in_txt = workdir.path().join("in.txt");
    fs::write(&in_txt, b"abc").unwrap();
    let in_txt_path = in_txt.to_string_lossy().into_owned();

    let provider = FakeProvider::default().with(
        "hello",
        TargetDef {
            file_deps: vec![in_txt_path.clone()],
            ..Default::default()
        },
    );
    let store = Store::init_at(store_dir.path()).unwrap();
    let mut scheduler = Scheduler::create(store.clone(), provider.clone());

    scheduler.build("hello").unwrap();

    assert!(scheduler.completed().contains_key("hello"));
    assert_eq!(provider.invocations_of("hello"), 1);

    let body_hash = provider.body_hash("hello").unwrap();
    let mut recipe = Recipe::new("hello");
    recipe.add_dependency(in_txt_path.clone());
    let key = recipe.compute_request_key(body_hash);

    let trace = Trace::load(&key, &store).unwrap();
    assert_eq!(trace.deps.len(), 1);
    assert_eq!(trace.deps[0].0, in_txt_path);
    assert!(trace.validate());
}

/// Scenarios 2 and 3: a second, independent scheduler (simulating a fresh
/// process) against the same store hits the persisted trace without
/// invoking the recipe body, until the dependency's contents change.
#[test]
fn second_run_hits_cache_until_dependency_changes() {
    let workdir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let in_txt = workdir.path().join("in.txt");
    fs::write(&in_txt, b"abc").unwrap();
    let in_txt_path = in_txt.to_string_lossy().into_owned();

    let def = TargetDef {
        file_deps: vec![in_txt_path],
        ..Default::default()
    };

    let store = Store::init_at(store_dir.path()).unwrap();

    let provider1 = FakeProvider::default().with("hello", def.clone());
    let mut scheduler1 = Scheduler::create(store.clone(), provider1.clone());
    scheduler1.build("hello").unwrap();
    assert_eq!(provider1.invocations_of("hello"), 1);

    // Scenario 2: unchanged input, fresh scheduler and provider.
    let provider2 = FakeProvider::default().with("hello", def.clone());
    let mut scheduler2 = Scheduler::create(store.clone(), provider2.clone());
    scheduler2.build("hello").unwrap();
    assert_eq!(provider2.invocations_of("hello"), 0, "cache hit must not invoke the recipe body");
    assert!(scheduler2.completed().contains_key("hello"));

    // Scenario 3: input changes, cache must invalidate.
    fs::write(workdir.path().join("in.txt"), b"abd").unwrap();
    let provider3 = FakeProvider::default().with("hello", def);
    let mut scheduler3 = Scheduler::create(store.clone(), provider3.clone());
    scheduler3.build("hello").unwrap();
    assert_eq!(provider3.invocations_of("hello"), 1, "changed dependency must miss the cache");
    assert!(scheduler3.completed().contains_key("hello"));
}

/// Scenario 4: declaration order of dependencies must not change the
/// request key, and therefore must still hit the trace saved by an earlier
/// run that declared the same files in the opposite order.
#[test]
fn declaration_order_does_not_affect_the_cache_key() {
    let workdir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let a = workdir.path().join("a.txt");
    let b = workdir.path().join("b.txt");
    fs::write(&a, b"1").unwrap();
    fs::write(&b, b"2").unwrap();
    let (a_path, b_path) = (a.to_string_lossy().into_owned(), b.to_string_lossy().into_owned());

    let store = Store::init_at(store_dir.path()).unwrap();

    let provider_ab = FakeProvider::default().with(
        "hello",
        TargetDef {
            file_deps: vec![a_path.clone(), b_path.clone()],
            ..Default::default()
        },
    );
    let mut scheduler_ab = Scheduler::create(store.clone(), provider_ab.clone());
    scheduler_ab.build("hello").unwrap();
    assert_eq!(provider_ab.invocations_of("hello"), 1);

    let provider_ba = FakeProvider::default().with(
        "hello",
        TargetDef {
            file_deps: vec![b_path, a_path],
            ..Default::default()
        },
    );
    let mut scheduler_ba = Scheduler::create(store.clone(), provider_ba.clone());
    scheduler_ba.build("hello").unwrap();
    assert_eq!(
        provider_ba.invocations_of("hello"),
        0,
        "same dependency set in a different declaration order must still hit the cache"
    );
}

/// Scenario 5: `top` suspends on `leaf`, `leaf` runs to completion, `top`
/// resumes and both end up `Complete`.
#[test]
fn suspend_and_resume_via_dependency() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Store::init_at(store_dir.path()).unwrap();

    let provider = FakeProvider::default()
        .with(
            "top",
            TargetDef {
                target_deps: vec!["leaf".to_string()],
                ..Default::default()
            },
        )
        .with("leaf", TargetDef::default());

    let mut scheduler = Scheduler::create(store, provider.clone());
    scheduler.build("top").unwrap();

    assert!(!scheduler.failed());
    assert!(scheduler.completed().contains_key("top"));
    assert!(scheduler.completed().contains_key("leaf"));
    assert_eq!(provider.invocations_of("leaf"), 1);
    // `top` runs once to discover it must suspend, and once more after
    // `leaf` completes.
    assert_eq!(provider.invocations_of("top"), 2);
}

/// Scenario 6: `bad`'s recipe fails; `top` (which depends on it) never
/// completes, and the scheduler records which target failed.
#[test]
fn failure_propagates_and_stops_the_dependent() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Store::init_at(store_dir.path()).unwrap();

    let provider = FakeProvider::default()
        .with(
            "top",
            TargetDef {
                target_deps: vec!["bad".to_string()],
                ..Default::default()
            },
        )
        .with(
            "bad",
            TargetDef {
                fail: true,
                ..Default::default()
            },
        );

    let mut scheduler = Scheduler::create(store, provider);
    let result = scheduler.build("top");

    assert!(result.is_err());
    assert!(scheduler.failed());
    assert_eq!(scheduler.target_error(), Some("bad"));
    assert!(!scheduler.completed().contains_key("top"));
}

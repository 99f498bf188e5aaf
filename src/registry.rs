//! Name → recipe-descriptor mapping populated by the [`crate::provider::RecipeProvider`]
//! at load time, read-only thereafter.

use std::collections::HashMap;

use tracing::warn;

/// An opaque handle the provider understands — e.g. a function name, or (for
/// the reference `BUILD.toml` provider) an index into its recipe list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub body_identifier: String,
}

/// Read-only (after population) name → descriptor table.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    targets: HashMap<String, Descriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a target descriptor. Replacing an existing
    /// registration logs a warning — it usually means two recipe
    /// definitions collided on a name.
    pub fn register(&mut self, name: impl Into<String>, body_identifier: impl Into<String>) {
        let name = name.into();
        let descriptor = Descriptor {
            name: name.clone(),
            body_identifier: body_identifier.into(),
        };
        if self.targets.insert(name.clone(), descriptor).is_some() {
            warn!(target = %name, "replaced existing recipe registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Descriptor> {
        self.targets.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// All registered target names, in unspecified order.
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_then_get() {
        let mut r = Registry::new();
        r.register("hello", "recipe_hello");
        assert_eq!(r.get("hello").unwrap().body_identifier, "recipe_hello");
    }

    #[test]
    fn has_is_membership_test() {
        let mut r = Registry::new();
        assert!(!r.has("hello"));
        r.register("hello", "recipe_hello");
        assert!(r.has("hello"));
    }

    #[test]
    fn register_replaces_existing() {
        let mut r = Registry::new();
        r.register("hello", "v1");
        r.register("hello", "v2");
        assert_eq!(r.get("hello").unwrap().body_identifier, "v2");
    }

    #[test]
    fn list_yields_all_names() {
        let mut r = Registry::new();
        r.register("a", "a");
        r.register("b", "b");
        let mut names: Vec<&str> = r.list().collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}

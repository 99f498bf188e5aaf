//! XDG-rooted directory layout and sharded path derivation.
//!
//! Mirrors the two-level sharded directory structure the teacher's
//! `LocalCas` uses (`{root}/{key[0..2]}/{key[2..]}`), adapted to the spec's
//! exact shard width (first two hex characters only) and its three
//! independent roots (traces, objects, scratch) instead of one.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{instrument, trace};

use crate::{config, hash::Hash};

/// The on-disk layout rooted at `$XDG_DATA_HOME/rebuild`
/// (fallback `$HOME/.local/share/rebuild`).
#[derive(Clone, Debug)]
pub struct Store {
    base: PathBuf,
    traces: PathBuf,
    objects: PathBuf,
    scratch: PathBuf,
}

impl Store {
    /// Resolve the base directory and create the layout if absent.
    ///
    /// After this returns, all four directories exist and are writable.
    #[instrument]
    pub fn init() -> color_eyre::Result<Self> {
        let data_root = config::xdg_data_home()?;
        Self::init_at(&data_root.join("rebuild"))
    }

    /// Like [`Store::init`], but rooted at an explicit base directory.
    /// Exposed so tests don't have to fight the real `$XDG_DATA_HOME`.
    #[instrument]
    pub fn init_at(base: &Path) -> color_eyre::Result<Self> {
        let base = base.to_path_buf();
        let traces = base.join("traces");
        let objects = base.join("objects");
        let scratch = base.join("tmp");

        for dir in [&base, &traces, &objects, &scratch] {
            create_dir_all_0755(dir)?;
        }

        trace!(?base, "initialized store");
        Ok(Self {
            base,
            traces,
            objects,
            scratch,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The sharded path for a trace with the given request key.
    /// Ensures the shard directory exists but does not create the file.
    pub fn trace_path(&self, key: &Hash) -> color_eyre::Result<PathBuf> {
        sharded_path(&self.traces, key)
    }

    /// The sharded path for an object with the given content hash.
    /// Ensures the shard directory exists but does not create the file.
    pub fn object_path(&self, key: &Hash) -> color_eyre::Result<PathBuf> {
        sharded_path(&self.objects, key)
    }

    pub fn trace_exists(&self, key: &Hash) -> bool {
        sharded_path(&self.traces, key)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    pub fn object_exists(&self, key: &Hash) -> bool {
        sharded_path(&self.objects, key)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// A fresh scratch directory for `target_name`, created on return.
    ///
    /// Disambiguated by `(target_name, unix_time, pid)` so concurrent
    /// `rebuild` processes never collide.
    #[instrument]
    pub fn scratch_dir(&self, target_name: &str) -> color_eyre::Result<PathBuf> {
        let unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let pid = std::process::id();
        let dir = self
            .scratch
            .join(format!("{target_name}_{unix_time}_{pid}"));
        create_dir_all_0755(&dir)?;
        Ok(dir)
    }
}

/// `<root>/<h[0:2]>/<h[2:64]>`, ensuring the shard directory exists.
fn sharded_path(root: &Path, key: &Hash) -> color_eyre::Result<PathBuf> {
    let hex = key.hex();
    let (shard, rest) = hex.split_at(2);
    let shard_dir = root.join(shard);
    create_dir_all_0755(&shard_dir)?;
    Ok(shard_dir.join(rest))
}

#[cfg(unix)]
fn create_dir_all_0755(dir: &Path) -> color_eyre::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(Into::into)
}

#[cfg(not(unix))]
fn create_dir_all_0755(dir: &Path) -> color_eyre::Result<()> {
    fs::create_dir_all(dir).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn init_creates_all_four_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init_at(&dir.path().join("rebuild")).unwrap();
        assert!(store.base.is_dir());
        assert!(store.traces.is_dir());
        assert!(store.objects.is_dir());
        assert!(store.scratch.is_dir());
    }

    #[test]
    fn trace_path_is_sharded_by_first_two_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init_at(&dir.path().join("rebuild")).unwrap();
        let key = hash_bytes(b"abc");
        let hex = key.hex();
        let path = store.trace_path(&key).unwrap();

        let expected_prefix = store.traces.join(&hex[..2]);
        assert!(path.starts_with(&expected_prefix));
        assert!(path.ends_with(&hex[2..]));
        assert!(expected_prefix.is_dir());
    }

    #[test]
    fn scratch_dir_is_created_and_named_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init_at(&dir.path().join("rebuild")).unwrap();
        let scratch = store.scratch_dir("hello").unwrap();
        assert!(scratch.is_dir());
        assert!(scratch.file_name().unwrap().to_string_lossy().starts_with("hello_"));
    }

    #[test]
    fn exists_probes_do_not_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::init_at(&dir.path().join("rebuild")).unwrap();
        let key = hash_bytes(b"nonexistent");
        assert!(!store.trace_exists(&key));
        assert!(!store.object_exists(&key));
    }
}

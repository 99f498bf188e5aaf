//! The constructive-trace record and its binary codec.
//!
//! Wire format (little-endian, fixed-width), unchanged from the original C
//! project's `trace.c` (`examples/original_source/src/trace.c`):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "RBTR"
//! 4       4     version (u32), currently 1
//! 8       32    request_key
//! 40      8     dep_count (u64)
//! ..      variable per dep:
//!               4   path_length (u32), must be <= 4096
//!               N   path bytes (no terminator)
//!               32  dep_hash
//! ..      32    output_tree_hash
//! ..      8     cpu_time_ms (u64)
//! ..      8     wall_time_ms (u64)
//! ```

use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};

use tracing::{instrument, trace as log_trace};

use crate::{hash::Hash, store::Store};

const MAGIC: &[u8; 4] = b"RBTR";
const VERSION: u32 = 1;
const MAX_PATH_LEN: u32 = 4096;

/// A recorded dependency: the path as declared, and its content hash at the
/// time the recipe that produced this trace ran.
pub type Dep = (String, Hash);

/// A persisted constructive-trace cache entry.
///
/// `deps` is in the insertion order used to compute `request_key`; that
/// order must be stable across save/load (spec.md §3 invariant).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
    pub request_key: Hash,
    pub deps: Vec<Dep>,
    pub output_tree_hash: Hash,
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
}

/// A trace file failed to parse: bad magic, bad version, or truncated /
/// inconsistent content. Recoverable — treat as a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported trace version {0}")]
    BadVersion(u32),
    #[error("request key in trace does not match the one requested")]
    KeyMismatch,
    #[error("dependency path length {0} exceeds the {MAX_PATH_LEN} byte limit")]
    PathTooLong(u32),
    #[error("could not read trace file: {0}")]
    Io(#[from] io::Error),
    #[error("dependency path is not valid UTF-8")]
    InvalidUtf8,
}

impl Trace {
    /// Write this trace to `store.trace_path(self.request_key)`.
    ///
    /// "Atomically-enough" for single-writer usage: write to a sibling temp
    /// file in the same shard directory, then rename over the destination,
    /// the same write-then-rename idiom the teacher's `LocalCas::write`
    /// uses for its content-addressed blobs.
    #[instrument(skip(self))]
    pub fn save(&self, store: &Store) -> color_eyre::Result<()> {
        let dst = store.trace_path(&self.request_key)?;
        let tmp = dst.with_extension(format!("tmp.{}", std::process::id()));

        let bytes = self.encode();
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &dst)?;
        log_trace!(request_key = %self.request_key, bytes = bytes.len(), "saved trace");
        Ok(())
    }

    /// Load the trace for `request_key` from the store.
    ///
    /// Any short read, magic/version mismatch, or stored-key mismatch
    /// yields [`ParseError`] — callers treat this as a cache miss.
    #[instrument]
    pub fn load(request_key: &Hash, store: &Store) -> Result<Trace, ParseError> {
        let path = store.trace_path(request_key).map_err(|_| {
            ParseError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "could not derive trace path",
            ))
        })?;
        let bytes = fs::read(&path)?;
        let trace = Self::decode(&bytes)?;
        if trace.request_key != *request_key {
            return Err(ParseError::KeyMismatch);
        }
        Ok(trace)
    }

    /// Re-hash every recorded dependency and compare against what was
    /// recorded. First mismatch or missing entry short-circuits to `false`.
    #[instrument(skip(self))]
    pub fn validate(&self) -> bool {
        for (path, expected) in &self.deps {
            let path = Path::new(path);
            let metadata = match fs::symlink_metadata(path) {
                Ok(m) => m,
                Err(_) => return false,
            };
            let actual = if metadata.is_file() {
                crate::hash::hash_file(path)
            } else if metadata.is_dir() {
                crate::hash::hash_tree(path)
            } else {
                return false;
            };
            match actual {
                Ok(actual) if actual == *expected => continue,
                _ => return false,
            }
        }
        true
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(self.request_key.as_bytes());
        buf.extend_from_slice(&(self.deps.len() as u64).to_le_bytes());
        for (path, hash) in &self.deps {
            let path_bytes = path.as_bytes();
            buf.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(path_bytes);
            buf.extend_from_slice(hash.as_bytes());
        }
        buf.extend_from_slice(self.output_tree_hash.as_bytes());
        buf.extend_from_slice(&self.cpu_time_ms.to_le_bytes());
        buf.extend_from_slice(&self.wall_time_ms.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Trace, ParseError> {
        let mut cursor = io::Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ParseError::BadMagic);
        }

        let version = read_u32(&mut cursor)?;
        if version != VERSION {
            return Err(ParseError::BadVersion(version));
        }

        let request_key = read_hash(&mut cursor)?;
        let dep_count = read_u64(&mut cursor)?;

        let mut deps = Vec::with_capacity(dep_count.min(1 << 20) as usize);
        for _ in 0..dep_count {
            let path_len = read_u32(&mut cursor)?;
            if path_len > MAX_PATH_LEN {
                return Err(ParseError::PathTooLong(path_len));
            }
            let mut path_bytes = vec![0u8; path_len as usize];
            cursor.read_exact(&mut path_bytes)?;
            let path = String::from_utf8(path_bytes).map_err(|_| ParseError::InvalidUtf8)?;
            let hash = read_hash(&mut cursor)?;
            deps.push((path, hash));
        }

        let output_tree_hash = read_hash(&mut cursor)?;
        let cpu_time_ms = read_u64(&mut cursor)?;
        let wall_time_ms = read_u64(&mut cursor)?;

        Ok(Trace {
            request_key,
            deps,
            output_tree_hash,
            cpu_time_ms,
            wall_time_ms,
        })
    }
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_hash(r: &mut impl Read) -> io::Result<Hash> {
    let mut buf = [0u8; 32];
    r.read_exact(&mut buf)?;
    Ok(Hash::from_bytes(buf))
}

//! Filesystem glob with tilde expansion, for the `glob(pattern)` callback
//! named in spec.md §6's Recipe Provider ABI.

use std::env;

/// Expand a leading `~` to `$HOME`, then glob. Matched directories get a
/// trailing slash appended so recipe bodies can tell files and directories
/// apart without a second `stat`.
pub fn glob(pattern: &str) -> Vec<String> {
    let expanded = expand_tilde(pattern);

    let entries = match glob::glob(&expanded) {
        Ok(paths) => paths,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(Result::ok)
        .map(|path| {
            let mut s = path.to_string_lossy().into_owned();
            if path.is_dir() && !s.ends_with('/') {
                s.push('/');
            }
            s
        })
        .collect()
}

fn expand_tilde(pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return format!("{home}/{rest}");
        }
    } else if pattern == "~" {
        if let Ok(home) = env::var("HOME") {
            return home;
        }
    }
    pattern.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn glob_matches_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        fs::write(dir.path().join("b.txt"), b"2").unwrap();

        let pattern = format!("{}/*.txt", dir.path().display());
        let mut matches = glob(&pattern);
        matches.sort();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn glob_marks_directories_with_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let matches = glob(&pattern);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].ends_with('/'));
    }

    #[test]
    fn expand_tilde_uses_home() {
        unsafe {
            env::set_var("HOME", "/tmp/home");
        }
        assert_eq!(expand_tilde("~/foo"), "/tmp/home/foo");
        assert_eq!(expand_tilde("no-tilde"), "no-tilde");
    }
}

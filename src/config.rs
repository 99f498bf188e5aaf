//! Environment-driven configuration.
//!
//! The engine takes no config file; everything it needs comes from the
//! environment, per spec.md §6. This module centralizes the one nontrivial
//! resolution rule (the XDG data directory fallback) so [`crate::store::Store`]
//! doesn't have to inline it.

use std::{env, path::PathBuf};

use thiserror::Error;

/// Failure resolving the data root from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME is not set and XDG_DATA_HOME is not set or not absolute")]
    NoHome,
}

/// Resolve `$XDG_DATA_HOME`, falling back to `$HOME/.local/share` when unset
/// or not absolute.
///
/// Absence of `HOME` in the fallback case is a fatal init error.
pub fn xdg_data_home() -> Result<PathBuf, ConfigError> {
    if let Ok(xdg) = env::var("XDG_DATA_HOME") {
        let path = PathBuf::from(&xdg);
        if path.is_absolute() {
            return Ok(path);
        }
    }

    let home = env::var("HOME").map_err(|_| ConfigError::NoHome)?;
    let home = PathBuf::from(home);
    if !home.is_absolute() {
        return Err(ConfigError::NoHome);
    }
    Ok(home.join(".local").join("share"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that mutate process environment must not run concurrently with
    // each other or they'll clobber one another's XDG_DATA_HOME/HOME.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn uses_xdg_data_home_when_absolute() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::set_var("XDG_DATA_HOME", "/tmp/somewhere");
        }
        assert_eq!(xdg_data_home().unwrap(), PathBuf::from("/tmp/somewhere"));
        unsafe {
            env::remove_var("XDG_DATA_HOME");
        }
    }

    #[test]
    fn falls_back_to_home_when_xdg_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::remove_var("XDG_DATA_HOME");
            env::set_var("HOME", "/tmp/home");
        }
        assert_eq!(xdg_data_home().unwrap(), PathBuf::from("/tmp/home/.local/share"));
    }

    #[test]
    fn falls_back_when_xdg_is_relative() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::set_var("XDG_DATA_HOME", "relative/path");
            env::set_var("HOME", "/tmp/home");
        }
        assert_eq!(xdg_data_home().unwrap(), PathBuf::from("/tmp/home/.local/share"));
        unsafe {
            env::remove_var("XDG_DATA_HOME");
        }
    }
}

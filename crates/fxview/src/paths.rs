use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "FXVIEW_CONFIG_DIR";
pub const CONFIG_FILE: &str = "pipeline.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "fxview";
const APPLICATION: &str = "fxview";

/// Directory searched for `pipeline.toml` when no path is given.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(value) = env_override(ENV_CONFIG_DIR) {
        return Some(value);
    }
    ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Resolves which configuration file to load, if any.
///
/// An explicit path must exist. Otherwise the config directory is consulted
/// and a missing file means built-in defaults.
pub fn discover_config(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let Some(dir) = config_dir() else {
        tracing::debug!("no user config directory available; using built-in defaults");
        return Ok(None);
    };
    let candidate = dir.join(CONFIG_FILE);
    if candidate.is_file() {
        Ok(Some(candidate))
    } else {
        tracing::debug!(path = %candidate.display(), "no config file found; using built-in defaults");
        Ok(None)
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &Path) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.previous.take() {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn explicit_path_wins_and_must_exist() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("custom.toml");
        assert!(discover_config(Some(&path)).is_err());

        fs::write(&path, "version = 1").unwrap();
        assert_eq!(discover_config(Some(&path)).unwrap(), Some(path));
    }

    #[test]
    fn env_directory_is_searched() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let _env = EnvGuard::set(ENV_CONFIG_DIR, root.path());

        assert_eq!(config_dir(), Some(root.path().to_path_buf()));
        assert_eq!(discover_config(None).unwrap(), None);

        let file = root.path().join(CONFIG_FILE);
        fs::write(&file, "version = 1").unwrap();
        assert_eq!(discover_config(None).unwrap(), Some(file));
    }
}

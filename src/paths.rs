//! Centralized path utilities for the application.
//!
//! Every user-supplied path (instance install paths and service paths alike) goes
//! through [`resolve_path`] before it is stored or touched on disk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

/// Get the default root data directory for the application (~/.bot_launcher).
pub fn default_data_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
    Ok(home.join(".bot_launcher"))
}

/// Get the path to the config file inside a data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Get the path to the persisted instance/service state inside a data directory.
pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state.toml")
}

/// Ensure all required data directories exist.
pub fn ensure_data_dirs(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)
        .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", data_dir, e)))?;
    let downloads = data_dir.join("downloads");
    fs::create_dir_all(&downloads)
        .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", downloads, e)))?;
    Ok(())
}

/// Resolve a raw path against the process's current working directory.
pub fn resolve_path(raw: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::io(format!("Failed to read current directory: {}", e)))?;
    resolve_path_from(raw, &cwd)
}

/// Resolve a raw path against `base`.
///
/// A leading `~` (bare, `~/...` or `~\...`) stands for `base`, not the OS home
/// directory. Relative paths are joined onto `base`; the result is lexically
/// normalized (`.` dropped, `..` applied) and always absolute.
pub fn resolve_path_from(raw: &str, base: &Path) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("path", "path must not be empty"));
    }

    let expanded = match strip_home_shorthand(trimmed) {
        Some("") => base.to_path_buf(),
        Some(rest) => base.join(rest),
        None => {
            let path = Path::new(trimmed);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        }
    };

    normalize(&expanded)
}

/// Returns the remainder after a home shorthand, or `None` if `raw` has none.
/// `~user` style prefixes are not shorthand.
fn strip_home_shorthand(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix('~')?;
    if rest.is_empty() {
        return Some("");
    }
    let rest_trimmed = rest.trim_start_matches(['/', '\\']);
    if rest_trimmed.len() == rest.len() {
        None
    } else {
        Some(rest_trimmed)
    }
}

fn normalize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir => {
                if !normalized.pop() && !normalized.has_root() {
                    return Err(AppError::validation(
                        "path",
                        format!("{:?} escapes the filesystem root", path),
                    ));
                }
            }
        }
    }

    if !normalized.is_absolute() {
        return Err(AppError::validation(
            "path",
            format!("{:?} does not resolve to an absolute path", path),
        ));
    }
    Ok(normalized)
}

/// Returns true if `path` is missing or an empty directory.
pub fn is_missing_or_empty_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(path)
        .map_err(|e| AppError::io(format!("Failed to read {:?}: {}", path, e)))?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn tilde_expands_to_base_not_home() {
        let base = Path::new("/home/u");
        assert_eq!(
            resolve_path_from("~/bots/bot1", base).unwrap(),
            PathBuf::from("/home/u/bots/bot1")
        );
        assert_eq!(resolve_path_from("~", base).unwrap(), PathBuf::from("/home/u"));
        assert_eq!(
            resolve_path_from("~//bots", base).unwrap(),
            PathBuf::from("/home/u/bots")
        );
    }

    #[cfg(unix)]
    #[test]
    fn absolute_paths_are_normalized_only() {
        let base = Path::new("/srv");
        assert_eq!(
            resolve_path_from("/opt/./bots/../bot", base).unwrap(),
            PathBuf::from("/opt/bot")
        );
    }

    #[cfg(unix)]
    #[test]
    fn relative_and_named_tilde_join_base() {
        let base = Path::new("/work");
        assert_eq!(
            resolve_path_from("bots/a", base).unwrap(),
            PathBuf::from("/work/bots/a")
        );
        assert_eq!(
            resolve_path_from("~alice/x", base).unwrap(),
            PathBuf::from("/work/~alice/x")
        );
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = resolve_path_from("   ", Path::new("/")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn missing_or_empty_dir_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_missing_or_empty_dir(dir.path()).unwrap());
        assert!(is_missing_or_empty_dir(&dir.path().join("nope")).unwrap());
        fs::write(dir.path().join("f"), "x").unwrap();
        assert!(!is_missing_or_empty_dir(dir.path()).unwrap());
    }
}

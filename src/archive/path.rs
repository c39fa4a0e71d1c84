use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry name to a relative path. Absolute names, drive
/// prefixes and `..` segments yield `None`.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// The single top-level directory every entry lives under, if there is one.
///
/// An archive whose only content is a flat set of files has no common
/// directory even when there is exactly one entry.
pub(super) fn detect_common_top_dir<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<String> = None;
    let mut saw_nested = false;

    for name in names {
        let Some(relative) = parse_entry_rel_path(name) else {
            continue;
        };
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_str()?.to_string();
        if components.next().is_some() {
            saw_nested = true;
        }
        match candidate.as_deref() {
            None => candidate = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }

    if saw_nested {
        candidate
    } else {
        None
    }
}

/// Drop `top_dir` from the front of `relative`. The top directory entry itself maps to `None`.
pub(super) fn strip_common_top_dir(relative: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let Some(top) = top_dir else {
        return Some(relative.to_path_buf());
    };
    let stripped = relative.strip_prefix(top).ok()?;
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}

/// Join `relative` onto the canonical form of `base_dir`, refusing anything
/// that would land outside it.
pub(super) fn resolve_within_dir(base_dir: &Path, relative: &Path) -> Result<PathBuf> {
    let canonical_base = base_dir
        .canonicalize()
        .map_err(|e| AppError::io(format!("Failed to canonicalize {:?}: {}", base_dir, e)))?;

    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(AppError::external(format!(
            "archive entry {:?} escapes the destination",
            relative
        )));
    }

    let candidate = canonical_base.join(relative);
    if !candidate.starts_with(&canonical_base) {
        return Err(AppError::external(format!(
            "archive entry {:?} escapes the destination",
            relative
        )));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_reject_traversal() {
        assert_eq!(
            parse_entry_rel_path("MaiBot-main/src/bot.py"),
            Some(PathBuf::from("MaiBot-main/src/bot.py"))
        );
        assert_eq!(parse_entry_rel_path("../etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("/abs/file"), None);
        assert_eq!(parse_entry_rel_path("C:/windows"), None);
        assert_eq!(parse_entry_rel_path("./"), None);
    }

    #[test]
    fn common_top_dir_requires_nesting() {
        let nested = ["MaiBot-main/", "MaiBot-main/bot.py", "MaiBot-main/src/a.py"];
        assert_eq!(
            detect_common_top_dir(nested.iter().copied()),
            Some("MaiBot-main".to_string())
        );
        assert_eq!(detect_common_top_dir(["bot.py"].iter().copied()), None);
        assert_eq!(
            detect_common_top_dir(["a/x.py", "b/y.py"].iter().copied()),
            None
        );
    }

    #[test]
    fn stripping_top_dir() {
        let rel = Path::new("MaiBot-main/src/a.py");
        assert_eq!(
            strip_common_top_dir(rel, Some("MaiBot-main")),
            Some(PathBuf::from("src/a.py"))
        );
        assert_eq!(
            strip_common_top_dir(Path::new("MaiBot-main"), Some("MaiBot-main")),
            None
        );
    }
}

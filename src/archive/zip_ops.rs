use std::fs;
use std::io;
use std::path::Path;

use crate::error::{AppError, Result};

use super::path::{
    detect_common_top_dir, parse_entry_rel_path, resolve_within_dir, strip_common_top_dir,
};

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("failed to set permissions on {path:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

fn write_file<R: io::Read>(out_path: &Path, reader: &mut R, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("failed to create directory {parent:?}: {e}")))?;
    }
    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
    io::copy(reader, &mut outfile)
        .map_err(|e| AppError::io(format!("failed to write {out_path:?}: {e}")))?;
    set_unix_permissions(out_path, mode)
}

/// Extract a zip archive into `dest_dir`, stripping a shared top-level directory
/// (the `Repo-tag/` prefix source archives carry). Returns the number of files written.
pub(crate) fn extract_zip_flat(archive_path: &Path, dest_dir: &Path) -> Result<usize> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| AppError::io(format!("failed to create {dest_dir:?}: {e}")))?;
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("failed to open {archive_path:?}: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)?;
    let top_dir = detect_common_top_dir(archive.file_names());
    let mut written = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();

        let Some(relative) = parse_entry_rel_path(&raw_name) else {
            return Err(AppError::external(format!(
                "archive contains unsafe path {raw_name:?}"
            )));
        };
        let Some(stripped) = strip_common_top_dir(&relative, top_dir.as_deref()) else {
            continue;
        };
        let out_path = resolve_within_dir(dest_dir, &stripped)?;

        if entry.is_symlink() {
            log::warn!("Skipping symbolic link {:?} in {:?}", raw_name, archive_path);
            continue;
        }
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
            continue;
        }

        let mode = entry.unix_mode();
        write_file(&out_path, &mut entry, mode)?;
        written += 1;
    }

    Ok(written)
}

//! Acquisition of artifact trees into an install directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::archive::extract_zip_flat;
use crate::download::download_file;
use crate::error::{AppError, Result};
use crate::paths::{is_missing_or_empty_dir, resolve_path_from};
use crate::process::output_tail;

/// Where an instance or service tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Shallow clone of the requested branch or tag.
    Git {
        url: String,
        #[serde(default)]
        mirror: Option<String>,
    },
    /// Zip download. `{version}` in the url is replaced by the requested version.
    Archive { url: String },
    /// Recursive copy of a template tree on this host.
    Local { path: String },
}

/// Shared inputs for one acquisition.
pub(crate) struct FetchContext<'a> {
    pub client: &'a Client,
    pub download_dir: &'a Path,
    /// Base for relative and `~` template paths.
    pub path_base: &'a Path,
    pub timeout: Duration,
}

/// Populate `dest` from `source`. `dest` must be missing or empty.
pub(crate) async fn acquire(
    source: &ArtifactSource,
    version: &str,
    dest: &Path,
    ctx: &FetchContext<'_>,
) -> Result<()> {
    if !is_missing_or_empty_dir(dest)? {
        return Err(AppError::external(format!(
            "{} already exists and is not empty; choose another path or clear it first",
            dest.display()
        )));
    }

    match source {
        ArtifactSource::Git { url, mirror } => {
            clone_with_fallback(url, mirror.as_deref(), version, dest, ctx.timeout).await
        }
        ArtifactSource::Archive { url } => {
            let url = url.replace("{version}", version);
            fetch_archive(ctx, &url, dest).await
        }
        ArtifactSource::Local { path } => {
            let template = resolve_path_from(path, ctx.path_base)?;
            let src = template.clone();
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
                .await
                .map_err(|e| AppError::external(format!("Copy task failed: {}", e)))?
                .map(|count| {
                    log::info!("Copied {} files from {:?}", count, template);
                })
        }
    }
}

/// Create `dest` as an empty directory for targets with nothing to fetch.
pub(crate) fn prepare_empty(dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .map_err(|e| AppError::external(format!("Failed to create {}: {}", dest.display(), e)))
}

async fn clone_with_fallback(
    url: &str,
    mirror: Option<&str>,
    version: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<()> {
    let primary = git_clone(url, version, dest, timeout).await;
    let result = match (primary, mirror) {
        (Ok(()), _) => Ok(()),
        (Err(e), Some(mirror)) => {
            log::warn!("Clone from {} failed ({}), trying mirror {}", url, e, mirror);
            clear_partial_clone(dest);
            git_clone(mirror, version, dest, timeout).await.map_err(|mirror_err| {
                AppError::external(format!(
                    "Clone failed from {} ({}) and from mirror {} ({})",
                    url,
                    e.message(),
                    mirror,
                    mirror_err.message()
                ))
            })
        }
        (Err(e), None) => Err(e),
    };

    if result.is_err() {
        clear_partial_clone(dest);
        return result;
    }

    let git_dir = dest.join(".git");
    if git_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&git_dir) {
            log::warn!("Failed to remove {:?}: {}", git_dir, e);
        }
    }
    Ok(())
}

fn clear_partial_clone(dest: &Path) {
    if dest.exists() {
        if let Err(e) = fs::remove_dir_all(dest) {
            log::warn!("Failed to clean up partial clone {:?}: {}", dest, e);
        }
    }
}

async fn git_clone(url: &str, version: &str, dest: &Path, timeout: Duration) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1"]);
    if version != "latest" {
        cmd.args(["--branch", version]);
    }
    cmd.arg(url).arg(dest).kill_on_drop(true);

    log::info!("Cloning {} ({}) into {:?}", url, version, dest);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            AppError::external(format!(
                "git clone of {} did not finish within {}s",
                url,
                timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::external(format!("Failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::external(format!(
            "git clone of {} at {} failed: {}",
            url,
            version,
            output_tail(&output.stderr, &output.stdout)
        )));
    }
    Ok(())
}

async fn fetch_archive(ctx: &FetchContext<'_>, url: &str, dest: &Path) -> Result<()> {
    let archive_path = ctx
        .download_dir
        .join(format!("{}.zip", uuid::Uuid::new_v4()));
    let result = async {
        tokio::time::timeout(ctx.timeout, download_file(ctx.client, url, &archive_path))
            .await
            .map_err(|_| AppError::external(format!("Download of {} timed out", url)))??;
        let archive = archive_path.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip_flat(&archive, &dest))
            .await
            .map_err(|e| AppError::external(format!("Extraction task failed: {}", e)))?
    }
    .await;

    if archive_path.exists() {
        if let Err(e) = fs::remove_file(&archive_path) {
            log::warn!("Failed to remove {:?}: {}", archive_path, e);
        }
    }
    let count = result?;
    log::info!("Extracted {} files from {} into {:?}", count, url, dest);
    Ok(())
}

/// Copy every file under `src` into `dest`, keeping the relative layout.
fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(AppError::external(format!(
            "Template directory {} does not exist",
            src.display()
        )));
    }
    fs::create_dir_all(dest)?;

    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative: PathBuf = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?
            .to_path_buf();
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            log::debug!("Skipping non-regular file {:?}", entry.path());
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(client: &'a Client, dir: &'a Path) -> FetchContext<'a> {
        FetchContext {
            client,
            download_dir: dir,
            path_base: dir,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn local_source_copies_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(template.join("src")).unwrap();
        fs::write(template.join("bot.py"), "print(1)").unwrap();
        fs::write(template.join("src/lib.py"), "").unwrap();

        let client = Client::new();
        let dest = dir.path().join("bot1");
        let source = ArtifactSource::Local {
            path: template.display().to_string(),
        };
        acquire(&source, "latest", &dest, &ctx(&client, dir.path()))
            .await
            .unwrap();
        assert!(dest.join("bot.py").is_file());
        assert!(dest.join("src/lib.py").is_file());
    }

    #[tokio::test]
    async fn refuses_non_empty_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bot1");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "x").unwrap();

        let client = Client::new();
        let source = ArtifactSource::Local {
            path: dir.path().display().to_string(),
        };
        let err = acquire(&source, "latest", &dest, &ctx(&client, dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::External);
        assert!(err.message().contains("not empty"));
        assert!(dest.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn missing_template_is_external_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let source = ArtifactSource::Local {
            path: dir.path().join("nope").display().to_string(),
        };
        let err = acquire(&source, "latest", &dir.path().join("out"), &ctx(&client, dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::External);
    }

    #[test]
    fn source_serialization_is_tagged() {
        let source: ArtifactSource = serde_json::from_value(serde_json::json!({
            "kind": "git",
            "url": "https://example.invalid/bot.git"
        }))
        .unwrap();
        assert_eq!(
            source,
            ArtifactSource::Git {
                url: "https://example.invalid/bot.git".to_string(),
                mirror: None
            }
        );
    }
}

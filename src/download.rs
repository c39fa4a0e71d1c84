use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{AppError, Result};

pub const USER_AGENT: &str = "bot-launcher";

/// Stream `url` into `dest`, creating parent directories. A partial file is
/// removed when the transfer fails.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| AppError::external(format!("Failed to reach {}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(AppError::external(format!(
            "Download of {} returned status {}",
            url,
            resp.status()
        )));
    }

    let mut file = fs::File::create(dest).map_err(|e| AppError::io(e.to_string()))?;
    let mut stream = resp.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(dest);
                return Err(AppError::external(format!(
                    "Download of {} interrupted: {}",
                    url, e
                )));
            }
        };
        file.write_all(&chunk)
            .map_err(|e| AppError::io(e.to_string()))?;
        total += chunk.len() as u64;
    }

    log::debug!("Downloaded {} bytes from {} to {:?}", total, url, dest);
    Ok(total)
}

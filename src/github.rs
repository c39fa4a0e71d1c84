//! Version listing from the bot repository's tags.

use std::cmp::Ordering;

use reqwest::Client;
use serde::Deserialize;

use crate::download::USER_AGENT;
use crate::error::{AppError, Result};

/// Pseudo-versions always offered first.
pub const FLOATING_VERSIONS: [&str; 2] = ["latest", "main"];

/// Tags that are packaging artifacts rather than releases.
const EXCLUDED_TAGS: [&str; 1] = ["EasyInstall-windows"];

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubTag {
    pub name: String,
}

pub async fn fetch_tags(client: &Client, tags_url: &str) -> Result<Vec<GitHubTag>> {
    let resp = client
        .get(tags_url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| AppError::external(format!("Failed to fetch tags: {}", e)))?;

    if !resp.status().is_success() {
        return Err(AppError::external(format!(
            "GitHub API returned status: {}",
            resp.status()
        )));
    }

    resp.json::<Vec<GitHubTag>>()
        .await
        .map_err(|e| AppError::external(format!("Failed to parse tags: {}", e)))
}

/// Available versions for deployment. Network failures fall back to the
/// floating versions only.
pub async fn list_versions(client: &Client, tags_url: &str) -> Vec<String> {
    match fetch_tags(client, tags_url).await {
        Ok(tags) => merge_versions(tags.into_iter().map(|t| t.name).collect()),
        Err(e) => {
            log::warn!("Version list unavailable, offering defaults only: {}", e);
            FLOATING_VERSIONS.iter().map(|v| v.to_string()).collect()
        }
    }
}

fn merge_versions(mut tags: Vec<String>) -> Vec<String> {
    tags.retain(|t| {
        !EXCLUDED_TAGS.contains(&t.as_str()) && !FLOATING_VERSIONS.contains(&t.as_str())
    });
    sort_versions_semver(&mut tags);
    tags.dedup();

    let mut versions: Vec<String> = FLOATING_VERSIONS.iter().map(|v| v.to_string()).collect();
    versions.extend(tags);
    versions
}

/// Newest semver first; anything that does not parse goes last.
fn sort_versions_semver(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        let av = semver::Version::parse(a.trim_start_matches('v')).ok();
        let bv = semver::Version::parse(b.trim_start_matches('v')).ok();

        match (av, bv) {
            (Some(va), Some(vb)) => vb.cmp(&va),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.cmp(a),
        }
    });
}

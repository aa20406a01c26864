//! Bucket syncing and manifest lookup.
//!
//! A bucket is a git repository holding one `<app>.json` manifest per app.
//! Syncing shells out to the `git` binary: shallow clone on first use, then
//! fast-forward pulls.

use crate::error::{PoksError, Result};
use crate::manifest::PoksBucket;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn run_git(bucket_name: &str, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| PoksError::BucketSync {
            name: bucket_name.to_string(),
            stderr: format!("failed to execute git: {e}"),
        })?;

    if !output.status.success() {
        return Err(PoksError::BucketSync {
            name: bucket_name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Clone or update a bucket repository and return its local path.
///
/// A bucket declared without a URL is reused as-is when a local copy exists;
/// this is how ad-hoc installs refer back to already-synced buckets.
pub fn sync_bucket(bucket: &PoksBucket, buckets_dir: &Path) -> Result<PathBuf> {
    let local_path = buckets_dir.join(&bucket.name);
    if bucket.url.is_empty() {
        if local_path.is_dir() {
            return Ok(local_path);
        }
        return Err(PoksError::BucketSync {
            name: bucket.name.clone(),
            stderr: "bucket has no url and no local copy".to_string(),
        });
    }
    if local_path.join(".git").exists() {
        tracing::info!("pulling latest for bucket '{}'", bucket.name);
        run_git(
            &bucket.name,
            &[
                "-C",
                local_path.to_str().unwrap_or_default(),
                "pull",
                "--ff-only",
            ],
        )?;
    } else {
        tracing::info!("cloning bucket '{}' from {}", bucket.name, bucket.url);
        fs::create_dir_all(buckets_dir)?;
        run_git(
            &bucket.name,
            &[
                "clone",
                "--depth",
                "1",
                &bucket.url,
                local_path.to_str().unwrap_or_default(),
            ],
        )?;
    }
    Ok(local_path)
}

/// Sync every bucket, returning `(name, local_path)` pairs in declaration
/// order.
pub fn sync_all_buckets(
    buckets: &[PoksBucket],
    buckets_dir: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    buckets
        .iter()
        .map(|b| sync_bucket(b, buckets_dir).map(|p| (b.name.clone(), p)))
        .collect()
}

/// Return the path to `<app_name>.json` inside one bucket directory.
pub fn find_manifest(app_name: &str, bucket_dir: &Path) -> Result<PathBuf> {
    let manifest_path = bucket_dir.join(format!("{app_name}.json"));
    if manifest_path.exists() {
        Ok(manifest_path)
    } else {
        Err(PoksError::ManifestNotFound {
            app: app_name.to_string(),
            searched: vec![bucket_dir.display().to_string()],
        })
    }
}

/// Search buckets in declaration order and return the first manifest hit.
///
/// When several buckets ship the same app, the first declared bucket wins
/// and the shadowed ones are reported with a warning.
pub fn find_manifest_in_buckets(
    app_name: &str,
    buckets: &[(String, PathBuf)],
) -> Result<(PathBuf, String)> {
    let mut hits = buckets
        .iter()
        .filter(|(_, dir)| dir.join(format!("{app_name}.json")).exists());

    let Some((winner_name, winner_dir)) = hits.next() else {
        return Err(PoksError::ManifestNotFound {
            app: app_name.to_string(),
            searched: buckets.iter().map(|(name, _)| name.clone()).collect(),
        });
    };
    for (shadowed, _) in hits {
        tracing::warn!(
            "manifest '{app_name}.json' in bucket '{shadowed}' is shadowed by bucket '{winner_name}'"
        );
    }
    Ok((
        winner_dir.join(format!("{app_name}.json")),
        winner_name.clone(),
    ))
}

/// Whether a bucket argument looks like a URL rather than a local name.
pub fn is_bucket_url(value: &str) -> bool {
    value.contains("://") || value.ends_with(".git")
}

/// Derive a filesystem-safe clone slot name from a bucket URL.
pub fn bucket_slot_from_url(url: &str) -> String {
    let stem = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(".git");
    if stem.is_empty() || stem.contains(['\\', ':']) {
        "adhoc".to_string()
    } else {
        stem.to_string()
    }
}

/// Search all locally synced buckets (directory scan, no git) for an app.
pub fn search_local_buckets(app_name: &str, buckets_dir: &Path) -> Result<(PathBuf, String)> {
    let mut searched = Vec::new();
    if buckets_dir.exists() {
        let mut entries: Vec<_> = fs::read_dir(buckets_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let manifest_path = entry.path().join(format!("{app_name}.json"));
            if manifest_path.exists() {
                return Ok((manifest_path, name));
            }
            searched.push(name);
        }
    }
    Err(PoksError::ManifestNotFound {
        app: app_name.to_string(),
        searched,
    })
}

//! Environment variable collection and merging for installed apps.

use crate::error::Result;
use crate::manifest::PoksAppVersion;
use crate::resolver::expand_variables;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Separator used when joining `PATH`-style lists.
pub fn path_separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}

fn dedup_preserving_order(entries: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

/// Build the environment updates contributed by one installed version.
///
/// `bin` entries resolve against `install_dir` into a single `PATH` value;
/// `env` templates expand `${dir}` to the install directory.
pub fn collect_env_updates(
    version: &PoksAppVersion,
    install_dir: &Path,
) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();

    if let Some(bin) = &version.bin {
        let paths = dedup_preserving_order(
            bin.iter()
                .map(|entry| install_dir.join(entry).to_string_lossy().into_owned())
                .collect(),
        );
        if !paths.is_empty() {
            result.insert(
                "PATH".to_string(),
                paths.join(&path_separator().to_string()),
            );
        }
    }

    if let Some(env) = &version.env {
        let variables = HashMap::from([(
            "dir".to_string(),
            install_dir.to_string_lossy().into_owned(),
        )]);
        for (key, template) in env {
            result.insert(key.clone(), expand_variables(template, &variables)?);
        }
    }
    Ok(result)
}

/// Merge env updates from several apps into one mapping.
///
/// `PATH` values concatenate in list order with duplicates removed; for any
/// other key the last writer wins and a conflict is logged.
pub fn merge_env_updates(updates: &[BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let sep = path_separator();
    let mut merged: BTreeMap<String, String> = BTreeMap::new();

    for env in updates {
        for (key, value) in env {
            if key == "PATH" {
                let mut entries: Vec<String> = merged
                    .get(key)
                    .map(|existing| existing.split(sep).map(str::to_string).collect())
                    .unwrap_or_default();
                entries.extend(value.split(sep).map(str::to_string));
                merged.insert(
                    key.clone(),
                    dedup_preserving_order(entries).join(&sep.to_string()),
                );
            } else {
                if let Some(previous) = merged.get(key)
                    && previous != value
                {
                    tracing::warn!(
                        "conflicting env var '{key}': overwriting '{previous}' with '{value}'"
                    );
                }
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

//! Typed records for manifests and configuration.
//!
//! Manifests tolerate unknown fields and carry them through re-serialization
//! (forward compatibility with newer schema versions). Configuration files
//! are strict: an unknown field is a hard `ConfigInvalid` error.

use crate::error::{PoksError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

fn default_schema_version() -> String {
    "1.0.0".to_string()
}

/// A bucket source pointing to a git repository of manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoksBucket {
    pub name: String,
    pub url: String,
}

/// An application entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoksApp {
    pub name: String,
    pub version: String,
    /// Bucket to resolve the manifest from. Absent means: search all
    /// declared buckets in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Vec<String>>,
}

impl PoksApp {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            bucket: None,
            os: None,
            arch: None,
        }
    }

    /// An absent filter means any platform is accepted.
    pub fn is_supported(&self, os: &str, arch: &str) -> bool {
        let os_ok = self.os.as_ref().is_none_or(|v| v.iter().any(|o| o == os));
        let arch_ok = self
            .arch
            .as_ref()
            .is_none_or(|v| v.iter().any(|a| a == arch));
        os_ok && arch_ok
    }
}

/// A platform-specific archive entry within a manifest version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoksArchive {
    pub os: String,
    pub arch: String,
    /// Lowercase hex SHA-256 of the archive content.
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// Overrides the version-level URL template when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Specific version details for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoksAppVersion {
    pub version: String,
    pub archives: Vec<PoksArchive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Non-empty reason string when the version must not be installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yanked: Option<String>,
    /// Version-level URL template with `${version}`, `${os}`, `${arch}`,
    /// `${ext}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PoksAppVersion {
    /// The yank reason, treating an empty string as not-yanked.
    pub fn yanked_reason(&self) -> Option<&str> {
        self.yanked.as_deref().filter(|r| !r.is_empty())
    }
}

/// Application manifest describing versions and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoksManifest {
    pub description: String,
    pub versions: Vec<PoksAppVersion>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PoksManifest {
    /// Read and validate a manifest JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&contents)
            .map_err(|e| PoksError::ManifestInvalid(format!("{}: {e}", path.display())))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn find_version(&self, version: &str) -> Option<&PoksAppVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Structural invariants beyond what serde can express.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(PoksError::ManifestInvalid(
                "manifest has no versions".to_string(),
            ));
        }
        let mut seen_versions = HashSet::new();
        for v in &self.versions {
            if !seen_versions.insert(v.version.as_str()) {
                return Err(PoksError::ManifestInvalid(format!(
                    "duplicate version '{}'",
                    v.version
                )));
            }
            if v.archives.is_empty() {
                return Err(PoksError::ManifestInvalid(format!(
                    "version '{}' has no archives",
                    v.version
                )));
            }
            let mut seen_platforms = HashSet::new();
            for archive in &v.archives {
                if !seen_platforms.insert((archive.os.as_str(), archive.arch.as_str())) {
                    return Err(PoksError::ManifestInvalid(format!(
                        "version '{}' has duplicate archive for ({}, {})",
                        v.version, archive.os, archive.arch
                    )));
                }
                if archive.ext.is_none() && archive.url.is_none() {
                    return Err(PoksError::ManifestInvalid(format!(
                        "version '{}' archive ({}, {}) has neither ext nor url",
                        v.version, archive.os, archive.arch
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level configuration file listing buckets and apps to install.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoksConfig {
    #[serde(default)]
    pub buckets: Vec<PoksBucket>,
    #[serde(default)]
    pub apps: Vec<PoksApp>,
}

impl PoksConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PoksError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for bucket in &self.buckets {
            if bucket.name.is_empty()
                || bucket.name.contains(['/', '\\'])
                || bucket.name == ".."
                || bucket.name == "."
            {
                return Err(PoksError::ConfigInvalid(format!(
                    "bucket name '{}' is not filesystem-safe",
                    bucket.name
                )));
            }
            if !names.insert(bucket.name.as_str()) {
                return Err(PoksError::ConfigInvalid(format!(
                    "duplicate bucket name '{}'",
                    bucket.name
                )));
            }
        }
        for app in &self.apps {
            if let Some(bucket) = &app.bucket
                && !names.contains(bucket.as_str())
            {
                return Err(PoksError::ConfigInvalid(format!(
                    "app '{}' references undeclared bucket '{}'",
                    app.name, bucket
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_manifest(json: &str) -> Result<PoksManifest> {
        let manifest: PoksManifest =
            serde_json::from_str(json).map_err(|e| PoksError::ManifestInvalid(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    #[test]
    fn manifest_roundtrip_preserves_unknown_fields() {
        let json = r#"{
            "description": "a tool",
            "future_field": {"nested": true},
            "versions": [{
                "version": "1.0.0",
                "archives": [{"os": "linux", "arch": "x86_64", "sha256": "ab", "ext": ".tar.gz"}]
            }]
        }"#;
        let manifest = minimal_manifest(json).unwrap();
        assert_eq!(manifest.extra["future_field"]["nested"], true);

        let serialized = manifest.to_json_string().unwrap();
        let reparsed: PoksManifest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(reparsed, manifest);
    }

    #[test]
    fn manifest_schema_version_defaults() {
        let json = r#"{
            "description": "d",
            "versions": [{
                "version": "1.0.0",
                "archives": [{"os": "linux", "arch": "x86_64", "sha256": "ab", "ext": ".zip"}]
            }]
        }"#;
        assert_eq!(minimal_manifest(json).unwrap().schema_version, "1.0.0");
    }

    #[test]
    fn manifest_empty_versions_rejected() {
        let json = r#"{"description": "d", "versions": []}"#;
        assert!(matches!(
            minimal_manifest(json),
            Err(PoksError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn manifest_duplicate_platform_rejected() {
        let json = r#"{
            "description": "d",
            "versions": [{
                "version": "1.0.0",
                "archives": [
                    {"os": "linux", "arch": "x86_64", "sha256": "ab", "ext": ".zip"},
                    {"os": "linux", "arch": "x86_64", "sha256": "cd", "ext": ".zip"}
                ]
            }]
        }"#;
        assert!(matches!(
            minimal_manifest(json),
            Err(PoksError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn manifest_archive_without_ext_or_url_rejected() {
        let json = r#"{
            "description": "d",
            "versions": [{
                "version": "1.0.0",
                "archives": [{"os": "linux", "arch": "x86_64", "sha256": "ab"}]
            }]
        }"#;
        assert!(matches!(
            minimal_manifest(json),
            Err(PoksError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let err = serde_json::from_str::<PoksConfig>(r#"{"buckets": [], "apps": [], "bogus": 1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn config_rejects_duplicate_buckets() {
        let config = PoksConfig {
            buckets: vec![
                PoksBucket {
                    name: "main".into(),
                    url: "https://example.com/a.git".into(),
                },
                PoksBucket {
                    name: "main".into(),
                    url: "https://example.com/b.git".into(),
                },
            ],
            apps: vec![],
        };
        assert!(matches!(
            config.validate(),
            Err(PoksError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn config_rejects_undeclared_bucket_reference() {
        let mut app = PoksApp::new("foo", "1.0.0");
        app.bucket = Some("missing".into());
        let config = PoksConfig {
            buckets: vec![],
            apps: vec![app],
        };
        assert!(matches!(
            config.validate(),
            Err(PoksError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn app_platform_filters() {
        let mut app = PoksApp::new("foo", "1.0.0");
        assert!(app.is_supported("linux", "x86_64"));

        app.os = Some(vec!["windows".into()]);
        assert!(!app.is_supported("linux", "x86_64"));
        assert!(app.is_supported("windows", "x86_64"));

        app.arch = Some(vec!["aarch64".into()]);
        assert!(!app.is_supported("windows", "x86_64"));
        assert!(app.is_supported("windows", "aarch64"));
    }

    #[test]
    fn yanked_reason_ignores_empty_string() {
        let json = r#"{
            "description": "d",
            "versions": [{
                "version": "1.0.0",
                "yanked": "",
                "archives": [{"os": "linux", "arch": "x86_64", "sha256": "ab", "ext": ".zip"}]
            }]
        }"#;
        let manifest = minimal_manifest(json).unwrap();
        assert_eq!(manifest.versions[0].yanked_reason(), None);
    }
}

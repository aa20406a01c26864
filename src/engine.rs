//! High-level Poks engine - unified interface for install workflows.
//!
//! The engine owns a root directory laid out as:
//!
//! ```text
//! <root>/
//!   apps/<name>/<version>/    # extracted payload + .manifest.json
//!   buckets/<name>/           # git-cloned manifest repository
//!   cache/<8hex>_<basename>   # content-addressed archive cache
//! ```
//!
//! It is constructed per process with an explicit root, so multiple roots can
//! coexist (tests, sandboxes). Apps install concurrently on a bounded worker
//! pool; within one app the steps run strictly in order
//! (download → verify → extract → poke → env). Results always come back in
//! config declaration order, regardless of which worker finished first.
//!
//! # Quick Start
//!
//! ```no_run
//! use poks::{Poks, PoksConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let poks = Poks::new(Poks::default_root())?;
//!     let report = poks.install_from_file("poks.json".as_ref()).await?;
//!     for app in &report.apps {
//!         println!("{} {} {}", app.name, app.version, app.status);
//!     }
//!     Ok(())
//! }
//! ```

use crate::bucket;
use crate::cancel::CancelToken;
use crate::download::{self, Downloader};
use crate::environment::{collect_env_updates, merge_env_updates};
use crate::error::{PoksError, Result};
use crate::extract;
use crate::manifest::{PoksApp, PoksBucket, PoksConfig, PoksManifest};
use crate::platform;
use crate::progress::Reporter;
use crate::resolver;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Provenance manifest persisted inside every installed version directory.
pub const MANIFEST_FILE_NAME: &str = ".manifest.json";

const DEFAULT_MAX_WORKERS: usize = 8;

/// Outcome of one app's install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStatus {
    Installed,
    SkippedExisting,
    SkippedPlatform,
    SkippedCancelled,
    Failed,
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallStatus::Installed => "installed",
            InstallStatus::SkippedExisting => "skipped-existing",
            InstallStatus::SkippedPlatform => "skipped-platform",
            InstallStatus::SkippedCancelled => "skipped-cancelled",
            InstallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-app install result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInstall {
    pub name: String,
    pub version: String,
    pub install_dir: PathBuf,
    pub status: InstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_updates: BTreeMap<String, String>,
    /// CLI exit code contribution; 0 unless the app failed.
    #[serde(skip)]
    pub exit_code: i32,
}

/// Aggregate result: per-app outcomes in declaration order plus the merged
/// environment updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallReport {
    pub apps: Vec<AppInstall>,
    pub env: BTreeMap<String, String>,
}

impl InstallReport {
    pub fn installed(&self) -> usize {
        self.count(InstallStatus::Installed)
    }

    pub fn skipped(&self) -> usize {
        self.apps
            .iter()
            .filter(|a| {
                matches!(
                    a.status,
                    InstallStatus::SkippedExisting
                        | InstallStatus::SkippedPlatform
                        | InstallStatus::SkippedCancelled
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.count(InstallStatus::Failed)
    }

    fn count(&self, status: InstallStatus) -> usize {
        self.apps.iter().filter(|a| a.status == status).count()
    }

    /// Strongest exit code among per-app failures, 0 when none failed.
    pub fn exit_code(&self) -> i32 {
        self.apps.iter().map(|a| a.exit_code).max().unwrap_or(0)
    }
}

/// An installed app discovered in the apps tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledApp {
    pub name: String,
    pub version: String,
    pub install_dir: PathBuf,
    pub bin_dirs: Vec<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// A manifest matched by a bucket-tree search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub bucket: String,
    pub name: String,
    pub versions: Vec<String>,
    pub description: String,
}

/// The package manager engine, rooted at one directory.
#[derive(Clone)]
pub struct Poks {
    root_dir: PathBuf,
    apps_dir: PathBuf,
    buckets_dir: PathBuf,
    cache_dir: PathBuf,
    downloader: Arc<Downloader>,
    reporter: Reporter,
    cancel: CancelToken,
    parallelism: usize,
}

fn default_parallelism() -> usize {
    if let Some(value) = std::env::var_os("POKS_PARALLELISM")
        && let Some(n) = value.to_str().and_then(|s| s.parse::<usize>().ok())
        && n > 0
    {
        return n;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(DEFAULT_MAX_WORKERS)
}

impl Poks {
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        let cache_dir = std::env::var_os("POKS_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| root_dir.join("cache"));
        Ok(Self {
            apps_dir: root_dir.join("apps"),
            buckets_dir: root_dir.join("buckets"),
            cache_dir,
            root_dir,
            downloader: Arc::new(Downloader::new()?),
            reporter: Reporter::disabled(),
            cancel: CancelToken::new(),
            parallelism: default_parallelism(),
        })
    }

    /// `POKS_ROOT`, else `~/.poks`.
    pub fn default_root() -> PathBuf {
        if let Some(root) = std::env::var_os("POKS_ROOT") {
            return PathBuf::from(root);
        }
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".poks")
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers.max(1);
        self
    }

    /// Token shared with every worker; cancel it to abort in-flight work.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Install every app in a configuration file.
    pub async fn install_from_file(&self, config_path: &Path) -> Result<InstallReport> {
        let config = PoksConfig::from_json_file(config_path)?;
        self.install(&config).await
    }

    /// Install every app in the configuration.
    ///
    /// Bucket sync happens once, up front; per-app failures are captured in
    /// the report without aborting the other apps. Re-running with the same
    /// config is a no-op that yields the same merged environment.
    pub async fn install(&self, config: &PoksConfig) -> Result<InstallReport> {
        config.validate()?;
        let (os, arch) = platform::current().clone();
        let bucket_paths = bucket::sync_all_buckets(&config.buckets, &self.buckets_dir)?;

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = Vec::new();
        for app in config.apps.clone() {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let bucket_paths = bucket_paths.clone();
            let os = os.clone();
            let arch = arch.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("worker pool closed");
                engine.install_one(&app, &bucket_paths, &os, &arch).await
            }));
        }

        // Joining in spawn order keeps results in declaration order.
        let mut apps = Vec::with_capacity(tasks.len());
        for task in tasks {
            apps.push(task.await.map_err(|e| PoksError::Other(anyhow!(e)))?);
        }

        let env_list: Vec<_> = apps.iter().map(|a| a.env_updates.clone()).collect();
        Ok(InstallReport {
            env: merge_env_updates(&env_list),
            apps,
        })
    }

    /// Install a single app by name.
    ///
    /// `bucket` may be a local bucket name or a git URL to clone on the fly.
    /// Without a bucket, all locally synced buckets are searched. Without a
    /// version, the first non-yanked manifest version is chosen.
    pub async fn install_app(
        &self,
        name: &str,
        version: Option<&str>,
        bucket_arg: Option<&str>,
    ) -> Result<InstallReport> {
        let manifest_path = match bucket_arg {
            Some(arg) if bucket::is_bucket_url(arg) => {
                let slot = bucket::bucket_slot_from_url(arg);
                let dir = bucket::sync_bucket(
                    &PoksBucket {
                        name: slot,
                        url: arg.to_string(),
                    },
                    &self.buckets_dir,
                )?;
                bucket::find_manifest(name, &dir)?
            }
            Some(arg) => {
                let dir = self.buckets_dir.join(arg);
                if !dir.exists() {
                    return Err(PoksError::ConfigInvalid(format!(
                        "bucket '{arg}' not found in {}",
                        self.buckets_dir.display()
                    )));
                }
                bucket::find_manifest(name, &dir)?
            }
            None => bucket::search_local_buckets(name, &self.buckets_dir)?.0,
        };

        let manifest = PoksManifest::from_json_file(&manifest_path)?;
        let version = self.pick_version(name, &manifest, version)?;
        self.single_app_report(name, &version, &manifest).await
    }

    /// Install one version straight from a manifest file, with no bucket
    /// side effects. The app name is the manifest file stem.
    pub async fn install_from_manifest(
        &self,
        manifest_path: &Path,
        version: &str,
    ) -> Result<InstallReport> {
        let name = manifest_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PoksError::ConfigInvalid(format!(
                    "cannot derive app name from {}",
                    manifest_path.display()
                ))
            })?;
        let manifest = PoksManifest::from_json_file(manifest_path)?;
        self.single_app_report(&name, version, &manifest).await
    }

    fn pick_version(
        &self,
        name: &str,
        manifest: &PoksManifest,
        requested: Option<&str>,
    ) -> Result<String> {
        match requested {
            Some(v) => Ok(v.to_string()),
            None => manifest
                .versions
                .iter()
                .find(|v| v.yanked_reason().is_none())
                .map(|v| v.version.clone())
                .ok_or_else(|| PoksError::VersionNotFound {
                    app: name.to_string(),
                    version: "*".to_string(),
                }),
        }
    }

    async fn single_app_report(
        &self,
        name: &str,
        version: &str,
        manifest: &PoksManifest,
    ) -> Result<InstallReport> {
        let (os, arch) = platform::current();
        let app = match self.install_version(name, version, manifest, os, arch).await {
            Ok(app) => app,
            Err(err) => self.failed_app(name, version, err),
        };
        Ok(InstallReport {
            env: merge_env_updates(std::slice::from_ref(&app.env_updates)),
            apps: vec![app],
        })
    }

    fn failed_app(&self, name: &str, version: &str, err: PoksError) -> AppInstall {
        let status = if matches!(err, PoksError::Cancelled) {
            InstallStatus::SkippedCancelled
        } else {
            InstallStatus::Failed
        };
        AppInstall {
            name: name.to_string(),
            version: version.to_string(),
            install_dir: self.apps_dir.join(name).join(version),
            status,
            error: (status == InstallStatus::Failed).then(|| err.to_string()),
            env_updates: BTreeMap::new(),
            exit_code: if status == InstallStatus::Failed {
                err.exit_code()
            } else {
                0
            },
        }
    }

    async fn install_one(
        &self,
        app: &PoksApp,
        bucket_paths: &[(String, PathBuf)],
        os: &str,
        arch: &str,
    ) -> AppInstall {
        if self.cancel.is_cancelled() {
            return self.failed_app(&app.name, &app.version, PoksError::Cancelled);
        }
        if !app.is_supported(os, arch) {
            tracing::info!("skipping {}: not supported on {os}/{arch}", app.name);
            return AppInstall {
                name: app.name.clone(),
                version: app.version.clone(),
                install_dir: self.apps_dir.join(&app.name).join(&app.version),
                status: InstallStatus::SkippedPlatform,
                error: None,
                env_updates: BTreeMap::new(),
                exit_code: 0,
            };
        }

        match self.install_selected(app, bucket_paths, os, arch).await {
            Ok(result) => result,
            Err(err) => self.failed_app(&app.name, &app.version, err),
        }
    }

    async fn install_selected(
        &self,
        app: &PoksApp,
        bucket_paths: &[(String, PathBuf)],
        os: &str,
        arch: &str,
    ) -> Result<AppInstall> {
        let manifest_path = match &app.bucket {
            Some(name) => {
                let dir = bucket_paths
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, d)| d.clone())
                    .ok_or_else(|| {
                        PoksError::ConfigInvalid(format!("bucket '{name}' was not synced"))
                    })?;
                bucket::find_manifest(&app.name, &dir)?
            }
            None => bucket::find_manifest_in_buckets(&app.name, bucket_paths)?.0,
        };
        let manifest = PoksManifest::from_json_file(&manifest_path)?;
        self.install_version(&app.name, &app.version, &manifest, os, arch)
            .await
    }

    async fn install_version(
        &self,
        name: &str,
        version: &str,
        manifest: &PoksManifest,
        os: &str,
        arch: &str,
    ) -> Result<AppInstall> {
        let app_version = manifest
            .find_version(version)
            .ok_or_else(|| PoksError::VersionNotFound {
                app: name.to_string(),
                version: version.to_string(),
            })?;
        if let Some(reason) = app_version.yanked_reason() {
            return Err(PoksError::YankedVersion {
                app: name.to_string(),
                version: version.to_string(),
                reason: reason.to_string(),
            });
        }

        let install_dir = self.apps_dir.join(name).join(version);
        if install_dir.join(MANIFEST_FILE_NAME).exists() {
            tracing::info!("skipping {name}@{version}: already installed");
            return self.existing_install(name, version, &install_dir);
        }

        self.cancel.check()?;
        let archive = resolver::resolve_archive(app_version, os, arch)?;
        let url = resolver::resolve_download_url(app_version, archive)?;
        let archive_path = self
            .downloader
            .get_cached_or_download(
                &url,
                &archive.sha256,
                &self.cache_dir,
                name,
                &self.reporter,
                &self.cancel,
            )
            .await?;

        self.cancel.check()?;
        let app_dir = self.apps_dir.join(name);
        fs::create_dir_all(&app_dir)?;

        // Extract into a staging directory first; only a fully extracted and
        // poked payload gets renamed into place, so a crash or cancel never
        // leaves a partial install visible.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{version}-"))
            .tempdir_in(&app_dir)?;

        let staging_path = staging.path().to_path_buf();
        let extract_dir = app_version.extract_dir.clone();
        let cancel = self.cancel.clone();
        let archive_for_task = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            extract::extract_archive(
                &archive_for_task,
                &staging_path,
                extract_dir.as_deref(),
                &cancel,
            )
            .map(|_| ())
        })
        .await
        .map_err(|e| PoksError::Other(anyhow!(e)))??;

        manifest.to_json_file(&staging.path().join(MANIFEST_FILE_NAME))?;

        let staging_path = staging.keep();
        if install_dir.join(MANIFEST_FILE_NAME).exists() {
            // Another worker (or process) finished the same install first.
            fs::remove_dir_all(&staging_path).ok();
            return self.existing_install(name, version, &install_dir);
        }
        if install_dir.exists() {
            // A version directory without a manifest is debris, never a
            // completed install; clear it so the rename can land.
            fs::remove_dir_all(&install_dir)?;
        }
        if let Err(err) = fs::rename(&staging_path, &install_dir) {
            fs::remove_dir_all(&staging_path).ok();
            return Err(err.into());
        }

        tracing::info!("installed {name}@{version}");
        Ok(AppInstall {
            name: name.to_string(),
            version: version.to_string(),
            env_updates: collect_env_updates(app_version, &install_dir)?,
            install_dir,
            status: InstallStatus::Installed,
            error: None,
            exit_code: 0,
        })
    }

    /// Result for an already-present install; env comes from the persisted
    /// manifest so it stays stable even if the bucket copy changed since.
    fn existing_install(
        &self,
        name: &str,
        version: &str,
        install_dir: &Path,
    ) -> Result<AppInstall> {
        let persisted = PoksManifest::from_json_file(&install_dir.join(MANIFEST_FILE_NAME))?;
        let env_updates = match persisted.find_version(version) {
            Some(v) => collect_env_updates(v, install_dir)?,
            None => {
                tracing::warn!("version {version} missing from persisted manifest for {name}");
                BTreeMap::new()
            }
        };
        Ok(AppInstall {
            name: name.to_string(),
            version: version.to_string(),
            install_dir: install_dir.to_path_buf(),
            status: InstallStatus::SkippedExisting,
            error: None,
            env_updates,
            exit_code: 0,
        })
    }

    /// Remove an installed version, or every version of an app.
    pub fn uninstall(&self, name: &str, version: Option<&str>, missing_ok: bool) -> Result<()> {
        let app_dir = self.apps_dir.join(name);
        match version {
            Some(v) => {
                let version_dir = app_dir.join(v);
                if !version_dir.exists() {
                    if missing_ok {
                        return Ok(());
                    }
                    return Err(PoksError::NotInstalled(format!("{name}@{v}")));
                }
                fs::remove_dir_all(&version_dir)?;
                tracing::info!("removed {name}@{v}");
                if app_dir.exists() && fs::read_dir(&app_dir)?.next().is_none() {
                    fs::remove_dir(&app_dir)?;
                }
            }
            None => {
                if !app_dir.exists() {
                    if missing_ok {
                        return Ok(());
                    }
                    return Err(PoksError::NotInstalled(name.to_string()));
                }
                fs::remove_dir_all(&app_dir)?;
                tracing::info!("removed {name}");
            }
        }
        Ok(())
    }

    /// Remove every installed app.
    pub fn uninstall_all(&self) -> Result<()> {
        if !self.apps_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.apps_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
                tracing::info!("removed {}", path.display());
            }
        }
        Ok(())
    }

    /// List installed apps by sweeping the apps tree for persisted manifests.
    pub fn list(&self) -> Result<Vec<InstalledApp>> {
        let mut installed = Vec::new();
        if !self.apps_dir.exists() {
            return Ok(installed);
        }

        let mut app_dirs: Vec<_> = fs::read_dir(&self.apps_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        app_dirs.sort_by_key(|e| e.file_name());

        for app_entry in app_dirs {
            let name = app_entry.file_name().to_string_lossy().into_owned();
            let mut version_dirs: Vec<_> = fs::read_dir(app_entry.path())?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .collect();
            version_dirs.sort_by_key(|e| e.file_name());

            for version_entry in version_dirs {
                let install_dir = version_entry.path();
                if !install_dir.join(MANIFEST_FILE_NAME).exists() {
                    continue;
                }
                let version = version_entry.file_name().to_string_lossy().into_owned();
                let (bin_dirs, env) = self.installed_details(&name, &version, &install_dir);
                installed.push(InstalledApp {
                    name: name.clone(),
                    version,
                    install_dir,
                    bin_dirs,
                    env,
                });
            }
        }
        Ok(installed)
    }

    fn installed_details(
        &self,
        name: &str,
        version: &str,
        install_dir: &Path,
    ) -> (Vec<PathBuf>, BTreeMap<String, String>) {
        let manifest = match PoksManifest::from_json_file(&install_dir.join(MANIFEST_FILE_NAME)) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!("failed to load manifest for {name}@{version}: {err}");
                return (Vec::new(), BTreeMap::new());
            }
        };
        let Some(app_version) = manifest.find_version(version) else {
            tracing::warn!("version {version} not found in stored manifest for {name}");
            return (Vec::new(), BTreeMap::new());
        };

        let bin_dirs = app_version
            .bin
            .iter()
            .flatten()
            .map(|b| install_dir.join(b))
            .collect();
        let env = match app_version.env.as_ref() {
            Some(_) => {
                let mut updates = collect_env_updates(app_version, install_dir)
                    .unwrap_or_default();
                updates.remove("PATH");
                updates
            }
            None => BTreeMap::new(),
        };
        (bin_dirs, env)
    }

    /// Case-insensitive substring search over manifest names in all synced
    /// buckets.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        if !self.buckets_dir.exists() {
            return Ok(hits);
        }

        let mut bucket_dirs: Vec<_> = fs::read_dir(&self.buckets_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        bucket_dirs.sort_by_key(|e| e.file_name());

        for bucket_entry in bucket_dirs {
            let bucket_name = bucket_entry.file_name().to_string_lossy().into_owned();
            let mut manifests: Vec<_> = fs::read_dir(bucket_entry.path())?
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some("json")
                        && e.path().is_file()
                })
                .collect();
            manifests.sort_by_key(|e| e.file_name());

            for manifest_entry in manifests {
                let path = manifest_entry.path();
                let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
                else {
                    continue;
                };
                if !name.to_lowercase().contains(&needle) {
                    continue;
                }
                match PoksManifest::from_json_file(&path) {
                    Ok(manifest) => hits.push(SearchHit {
                        bucket: bucket_name.clone(),
                        name,
                        versions: manifest
                            .versions
                            .iter()
                            .map(|v| v.version.clone())
                            .collect(),
                        description: manifest.description,
                    }),
                    Err(err) => {
                        tracing::warn!("skipping unreadable manifest {}: {err}", path.display());
                    }
                }
            }
        }
        Ok(hits)
    }

    /// Delete all cached archives.
    pub fn cache_clear(&self) -> Result<()> {
        download::clear(&self.cache_dir)
    }

    /// Total size of the archive cache in bytes.
    pub fn cache_size(&self) -> Result<u64> {
        download::size(&self.cache_dir)
    }
}

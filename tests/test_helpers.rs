// Test helpers for isolated testing
// Provides temp-rooted engine environments plus archive and bucket builders

#![allow(dead_code)]

use poks::{Poks, PoksManifest};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Isolated engine environment rooted in a temporary directory.
/// Automatically cleaned up when dropped (RAII pattern).
pub struct PoksEnv {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub apps: PathBuf,
    pub buckets: PathBuf,
    pub cache: PathBuf,
    pub archives: PathBuf,
    pub poks: Poks,
}

impl PoksEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let root = temp_dir.path().join("root");
        let archives = temp_dir.path().join("archives");
        fs::create_dir_all(&archives).unwrap();

        let poks = Poks::new(&root).expect("failed to create engine").with_parallelism(2);
        Self {
            apps: root.join("apps"),
            buckets: root.join("buckets"),
            cache: root.join("cache"),
            root,
            archives,
            temp_dir,
            poks,
        }
    }

    /// Drop a manifest JSON straight into a local bucket directory, the way
    /// a synced bucket would look on disk.
    pub fn seed_bucket(&self, bucket: &str, app: &str, manifest: &PoksManifest) {
        let dir = self.buckets.join(bucket);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{app}.json")),
            manifest.to_json_string().unwrap(),
        )
        .unwrap();
    }

    pub fn install_dir(&self, app: &str, version: &str) -> PathBuf {
        self.apps.join(app).join(version)
    }
}

impl Default for PoksEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Create a tar.gz archive with the given text files and return
/// `(path, sha256)`. `top_dir` wraps everything in one top-level directory.
pub fn create_tar_gz(
    dir: &Path,
    archive_name: &str,
    files: &[(&str, &str)],
    top_dir: Option<&str>,
) -> (PathBuf, String) {
    let path = dir.join(archive_name);
    let file = File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let entry_name = match top_dir {
            Some(top) => format!("{top}/{name}"),
            None => name.to_string(),
        };
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(if name.starts_with("bin/") { 0o755 } else { 0o644 });
        header.set_cksum();
        builder
            .append_data(&mut header, entry_name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    let sha = sha256_hex(&fs::read(&path).unwrap());
    (path, sha)
}

/// Create a zip archive with the given text files and return `(path, sha256)`.
pub fn create_zip(dir: &Path, archive_name: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
    let path = dir.join(archive_name);
    let file = File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    let sha = sha256_hex(&fs::read(&path).unwrap());
    (path, sha)
}

/// A prefix patch record for a conda fixture.
pub struct CondaPatch<'a> {
    pub path: &'a str,
    pub placeholder: &'a str,
    pub mode: &'a str,
}

fn tar_bytes(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Create a `.conda` archive: an outer zip holding `info-*.tar.zst` (with
/// `paths.json`) and `pkg-*.tar.zst` (the payload). Returns `(path, sha256)`.
pub fn create_conda(
    dir: &Path,
    archive_name: &str,
    files: &[(&str, &[u8])],
    patches: &[CondaPatch<'_>],
) -> (PathBuf, String) {
    let paths_json = serde_json::json!({
        "paths": patches
            .iter()
            .map(|p| {
                serde_json::json!({
                    "_path": p.path,
                    "prefix_placeholder": p.placeholder,
                    "file_mode": p.mode,
                })
            })
            .collect::<Vec<_>>(),
        "paths_version": 1,
    });
    let info_tar = tar_bytes(&[(
        "info/paths.json".to_string(),
        serde_json::to_vec_pretty(&paths_json).unwrap(),
    )]);
    let pkg_tar = tar_bytes(
        &files
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_vec()))
            .collect::<Vec<_>>(),
    );

    let path = dir.join(archive_name);
    let file = File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("info-pkg.tar.zst", options).unwrap();
    writer
        .write_all(&zstd::encode_all(info_tar.as_slice(), 0).unwrap())
        .unwrap();
    writer.start_file("pkg-pkg.tar.zst", options).unwrap();
    writer
        .write_all(&zstd::encode_all(pkg_tar.as_slice(), 0).unwrap())
        .unwrap();
    writer.finish().unwrap();

    let sha = sha256_hex(&fs::read(&path).unwrap());
    (path, sha)
}

/// Whether the `git` binary is usable; tests that need real repositories
/// return early when it is not.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "poks-tests")
        .env("GIT_AUTHOR_EMAIL", "tests@example.invalid")
        .env("GIT_COMMITTER_NAME", "poks-tests")
        .env("GIT_COMMITTER_EMAIL", "tests@example.invalid")
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Build a real git repository holding manifest files; returns a `file://`
/// clone URL.
pub fn create_bucket_repo(dir: &Path, manifests: &[(&str, &PoksManifest)]) -> String {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "--quiet", "--initial-branch=main"]);
    for (name, manifest) in manifests {
        fs::write(
            dir.join(format!("{name}.json")),
            manifest.to_json_string().unwrap(),
        )
        .unwrap();
    }
    git(dir, &["add", "."]);
    git(dir, &["commit", "--quiet", "-m", "add manifests"]);
    file_url(dir)
}

/// Build a one-version manifest pointing at a local archive.
pub fn manifest_for_archive(
    description: &str,
    version: &str,
    os: &str,
    arch: &str,
    ext: &str,
    archive_path: &Path,
    sha256: &str,
) -> PoksManifest {
    let json = serde_json::json!({
        "description": description,
        "versions": [{
            "version": version,
            "url": file_url(archive_path),
            "archives": [{ "os": os, "arch": arch, "ext": ext, "sha256": sha256 }],
        }],
    });
    serde_json::from_value(json).unwrap()
}

//! Archive extraction into install directories.
//!
//! Formats are detected by longest-suffix match, so `foo.tar.gz` is tar+gzip
//! rather than "gz". Every entry path is validated before anything touches
//! the filesystem: absolute paths and `..` traversal are hard errors, and
//! symlinks whose target would escape the destination are skipped with a
//! warning.
//!
//! `.conda` archives are zip containers holding two zstd-compressed inner
//! tarballs: `info-*.tar.zst` (metadata, including `paths.json` with prefix
//! patch records) and `pkg-*.tar.zst` (the payload). After the payload is
//! unpacked the recorded prefix patches are applied.

use crate::cancel::CancelToken;
use crate::error::{PoksError, Result};
use crate::poker::{self, FileMode, PatchEntry};
use anyhow::anyhow;
use serde::Deserialize;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
    TarBz2,
    SevenZ,
    Conda,
}

/// Longest extensions first so `.tar.gz` wins over any shorter suffix.
const SUPPORTED_FORMATS: &[(&str, ArchiveFormat)] = &[
    (".tar.bz2", ArchiveFormat::TarBz2),
    (".tar.gz", ArchiveFormat::TarGz),
    (".tar.xz", ArchiveFormat::TarXz),
    (".conda", ArchiveFormat::Conda),
    (".tbz2", ArchiveFormat::TarBz2),
    (".tgz", ArchiveFormat::TarGz),
    (".txz", ArchiveFormat::TarXz),
    (".zip", ArchiveFormat::Zip),
    (".7z", ArchiveFormat::SevenZ),
];

/// Detect the archive format from a file name.
pub fn detect_format(file_name: &str) -> Result<ArchiveFormat> {
    let lower = file_name.to_ascii_lowercase();
    SUPPORTED_FORMATS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, fmt)| *fmt)
        .ok_or_else(|| {
            let ext = lower
                .rfind('.')
                .map(|i| lower[i..].to_string())
                .unwrap_or(lower);
            PoksError::UnsupportedArchive(ext)
        })
}

/// Join an archive entry path onto `dest`, rejecting anything that could
/// resolve outside it.
fn safe_join(dest: &Path, entry: &Path) -> Result<PathBuf> {
    let mut out = dest.to_path_buf();
    for comp in entry.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(PoksError::UnsafeArchive(entry.to_path_buf())),
        }
    }
    Ok(out)
}

/// Whether a symlink at `entry_rel` (relative to the destination root) may
/// point at `target` without escaping the destination. Purely lexical; the
/// target does not need to exist yet.
fn symlink_target_is_safe(entry_rel: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut depth = entry_rel
        .parent()
        .map(|p| {
            p.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count() as isize
        })
        .unwrap_or(0);
    for comp in target.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::CurDir => {}
            _ => return false,
        }
    }
    true
}

/// Extract an archive into `dest_dir` and return the final directory.
///
/// When `extract_dir` is set, the named top-level directory is flattened:
/// its children are moved directly under `dest_dir` and the wrapper is
/// removed. Siblings of the wrapper stay in place.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    extract_dir: Option<&str>,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fmt = detect_format(&file_name)?;
    fs::create_dir_all(dest_dir)?;

    match fmt {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, cancel)?,
        ArchiveFormat::TarGz => {
            let file = File::open(archive_path)?;
            extract_tar(flate2::read::GzDecoder::new(file), dest_dir, cancel)?;
        }
        ArchiveFormat::TarXz => {
            let file = File::open(archive_path)?;
            extract_tar(xz2::read::XzDecoder::new(file), dest_dir, cancel)?;
        }
        ArchiveFormat::TarBz2 => {
            let file = File::open(archive_path)?;
            extract_tar(bzip2::read::BzDecoder::new(file), dest_dir, cancel)?;
        }
        ArchiveFormat::SevenZ => extract_7z(archive_path, dest_dir, cancel)?,
        ArchiveFormat::Conda => extract_conda(archive_path, dest_dir, cancel)?,
    }

    if let Some(sub) = extract_dir {
        flatten_extract_dir(dest_dir, sub)?;
    }
    Ok(dest_dir.to_path_buf())
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path, cancel: &CancelToken) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(cfg!(unix));

    for entry in archive.entries()? {
        cancel.check()?;
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = safe_join(dest_dir, &entry_path)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let Some(link) = entry.link_name()? else {
                continue;
            };
            if !symlink_target_is_safe(&entry_path, &link) {
                tracing::warn!(
                    "skipping link '{}' -> '{}': target escapes destination",
                    entry_path.display(),
                    link.display()
                );
                continue;
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path, cancel: &CancelToken) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| anyhow!("failed to read zip archive {}: {e}", archive_path.display()))?;

    for i in 0..archive.len() {
        cancel.check()?;
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("failed to read zip entry: {e}"))?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(PoksError::UnsafeArchive(PathBuf::from(entry.name())));
        };
        let target = safe_join(dest_dir, &rel)?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

fn extract_7z(archive_path: &Path, dest_dir: &Path, cancel: &CancelToken) -> Result<()> {
    use sevenz_rust::{Password, SevenZReader};

    let mut reader = SevenZReader::open(archive_path, Password::empty())
        .map_err(|e| anyhow!("failed to open 7z archive {}: {e}", archive_path.display()))?;

    let dest = dest_dir.to_path_buf();
    let mut unsafe_path: Option<PathBuf> = None;
    let mut cancelled = false;
    reader
        .for_each_entries(|entry, entry_reader| {
            if cancel.is_cancelled() {
                cancelled = true;
                return Ok(false);
            }
            let rel = PathBuf::from(entry.name());
            match safe_join(&dest, &rel) {
                Ok(target) => sevenz_rust::default_entry_extract_fn(entry, entry_reader, &target),
                Err(_) => {
                    unsafe_path = Some(rel);
                    Ok(false)
                }
            }
        })
        .map_err(|e| anyhow!("failed to extract 7z archive {}: {e}", archive_path.display()))?;

    if let Some(path) = unsafe_path {
        return Err(PoksError::UnsafeArchive(path));
    }
    if cancelled {
        return Err(PoksError::Cancelled);
    }
    Ok(())
}

#[derive(Deserialize)]
struct CondaPathsFile {
    #[serde(default)]
    paths: Vec<CondaPathsEntry>,
}

#[derive(Deserialize)]
struct CondaPathsEntry {
    #[serde(rename = "_path")]
    path: String,
    #[serde(default)]
    prefix_placeholder: Option<String>,
    #[serde(default)]
    file_mode: Option<String>,
}

/// Pull patch records out of the `info` tarball's `paths.json`.
fn parse_conda_patches(info_tar_zst: &[u8]) -> Result<Vec<PatchEntry>> {
    let tar_bytes = zstd::decode_all(Cursor::new(info_tar_zst))?;
    let mut archive = tar::Archive::new(Cursor::new(tar_bytes));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.file_name() != Some(OsStr::new("paths.json")) {
            continue;
        }
        let mut json = String::new();
        entry.read_to_string(&mut json)?;
        let parsed: CondaPathsFile = serde_json::from_str(&json)?;
        let patches = parsed
            .paths
            .into_iter()
            .filter_map(|e| {
                let prefix_placeholder = e.prefix_placeholder?;
                let file_mode = match e.file_mode.as_deref() {
                    Some("text") => FileMode::Text,
                    Some("binary") => FileMode::Binary,
                    Some(other) => {
                        tracing::warn!("unknown file_mode '{other}' for {}, skipping", e.path);
                        return None;
                    }
                    None => return None,
                };
                Some(PatchEntry {
                    path: e.path,
                    prefix_placeholder,
                    file_mode,
                })
            })
            .collect();
        return Ok(patches);
    }
    Ok(Vec::new())
}

fn extract_conda(archive_path: &Path, dest_dir: &Path, cancel: &CancelToken) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| anyhow!("failed to read conda archive {}: {e}", archive_path.display()))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let info_name = names
        .iter()
        .find(|n| n.starts_with("info-") && n.ends_with(".tar.zst"))
        .cloned();
    let pkg_name = names
        .iter()
        .find(|n| n.starts_with("pkg-") && n.ends_with(".tar.zst"))
        .cloned()
        .ok_or_else(|| {
            anyhow!(
                "invalid conda archive {}: no pkg-*.tar.zst member",
                archive_path.display()
            )
        })?;

    let read_member = |archive: &mut zip::ZipArchive<File>, name: &str| -> Result<Vec<u8>> {
        let mut member = archive
            .by_name(name)
            .map_err(|e| anyhow!("failed to read conda member '{name}': {e}"))?;
        let mut data = Vec::new();
        member.read_to_end(&mut data)?;
        Ok(data)
    };

    let patches = match info_name {
        Some(name) => parse_conda_patches(&read_member(&mut archive, &name)?)?,
        None => Vec::new(),
    };

    let pkg_tar = zstd::decode_all(Cursor::new(read_member(&mut archive, &pkg_name)?))?;
    extract_tar(Cursor::new(pkg_tar), dest_dir, cancel)?;

    if !patches.is_empty() {
        poker::poke(dest_dir, &patches)?;
    }
    Ok(())
}

/// Move the children of `dest_dir/<sub>` directly under `dest_dir`.
fn flatten_extract_dir(dest_dir: &Path, sub: &str) -> Result<()> {
    let source = safe_join(dest_dir, Path::new(sub))?;
    if !source.is_dir() {
        return Err(PoksError::ExtractDirNotFound(sub.to_string()));
    }
    for item in fs::read_dir(&source)? {
        let item = item?;
        fs::rename(item.path(), dest_dir.join(item.file_name()))?;
    }
    fs::remove_dir(&source)?;
    Ok(())
}

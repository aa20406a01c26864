//! Prefix patching for relocatable conda payloads.
//!
//! Conda packages embed the build-time prefix in scripts and binaries. After
//! extraction every recorded file is rewritten so it points at the actual
//! install directory. Text files get a straight substitution; binaries get a
//! NUL-padded replacement that preserves the file size exactly, which is why
//! an install path longer than the placeholder is a hard error rather than a
//! silent truncation.

use crate::error::{PoksError, Result};
use rayon::prelude::*;
use std::fs;
use std::path::Path;

/// How a recorded file embeds the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Text,
    Binary,
}

/// A single file that needs prefix replacement.
#[derive(Debug, Clone)]
pub struct PatchEntry {
    /// Path relative to the install directory.
    pub path: String,
    pub prefix_placeholder: String,
    pub file_mode: FileMode,
}

/// Replace build prefixes with the actual install directory.
///
/// Files are independent, so patches run in parallel. Entries whose file is
/// missing are skipped with a warning. Re-running on an already patched
/// install is a no-op: the placeholder no longer occurs.
pub fn poke(install_dir: &Path, patches: &[PatchEntry]) -> Result<()> {
    let new_prefix = install_dir.to_string_lossy().into_owned();

    let results: Vec<Result<()>> = patches
        .par_iter()
        .map(|entry| {
            let target = install_dir.join(&entry.path);
            if !target.is_file() {
                tracing::warn!("skipping patch for missing file: {}", entry.path);
                return Ok(());
            }
            match entry.file_mode {
                FileMode::Text => poke_text(&target, &entry.prefix_placeholder, &new_prefix),
                FileMode::Binary => poke_binary(&target, &entry.prefix_placeholder, &new_prefix),
            }
        })
        .collect();

    results.into_iter().collect()
}

/// Replace every occurrence of `needle`, returning `None` when nothing
/// matched so untouched files are not rewritten.
fn replace_bytes(data: &[u8], needle: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
    if needle.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    let mut found = false;
    while i < data.len() {
        if data[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
            found = true;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    found.then_some(out)
}

fn poke_text(target: &Path, placeholder: &str, new_prefix: &str) -> Result<()> {
    let data = fs::read(target)?;
    let mut updated = replace_bytes(&data, placeholder.as_bytes(), new_prefix.as_bytes());

    // Placeholders recorded with backslashes also occur forward-slashed.
    if placeholder.contains('\\') {
        let fwd_placeholder = placeholder.replace('\\', "/");
        let fwd_prefix = new_prefix.replace('\\', "/");
        let source = updated.as_deref().unwrap_or(&data);
        if let Some(next) =
            replace_bytes(source, fwd_placeholder.as_bytes(), fwd_prefix.as_bytes())
        {
            updated = Some(next);
        }
    }

    if let Some(updated) = updated {
        fs::write(target, updated)?;
    }
    Ok(())
}

fn poke_binary(target: &Path, placeholder: &str, new_prefix: &str) -> Result<()> {
    let placeholder_bytes = placeholder.as_bytes();
    let new_bytes = new_prefix.as_bytes();
    if new_bytes.len() > placeholder_bytes.len() {
        return Err(PoksError::PrefixTooLong {
            file: target.to_path_buf(),
            install_len: new_bytes.len(),
            placeholder_len: placeholder_bytes.len(),
        });
    }

    let pad = |prefix: &[u8], total: usize| {
        let mut padded = prefix.to_vec();
        padded.resize(total, 0);
        padded
    };

    let data = fs::read(target)?;
    let mut updated = replace_bytes(
        &data,
        placeholder_bytes,
        &pad(new_bytes, placeholder_bytes.len()),
    );

    if placeholder.contains('\\') {
        let fwd_placeholder = placeholder.replace('\\', "/");
        let fwd_prefix = new_prefix.replace('\\', "/");
        let source = updated.as_deref().unwrap_or(&data);
        if let Some(next) = replace_bytes(
            source,
            fwd_placeholder.as_bytes(),
            &pad(fwd_prefix.as_bytes(), fwd_placeholder.len()),
        ) {
            updated = Some(next);
        }
    }

    if let Some(updated) = updated {
        fs::write(target, updated)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, placeholder: &str, mode: FileMode) -> PatchEntry {
        PatchEntry {
            path: path.to_string(),
            prefix_placeholder: placeholder.to_string(),
            file_mode: mode,
        }
    }

    #[test]
    fn test_text_patch() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        let file = dir.path().join("lib/tool.sh");
        fs::write(&file, "#!/opt/placeholder/bin/sh\nPREFIX=/opt/placeholder\n").unwrap();

        poke(
            dir.path(),
            &[entry("lib/tool.sh", "/opt/placeholder", FileMode::Text)],
        )
        .unwrap();

        let content = fs::read_to_string(&file).unwrap();
        let prefix = dir.path().to_string_lossy();
        assert_eq!(content, format!("#!{prefix}/bin/sh\nPREFIX={prefix}\n"));
        assert!(!content.contains("/opt/placeholder"));
    }

    #[test]
    fn test_binary_patch_is_length_preserving() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        let placeholder = format!("/opt/some/very/long/build/prefix/{}", "x".repeat(64));
        let data = [b"ELF\x00".as_slice(), placeholder.as_bytes(), b"\x00tail"].concat();
        fs::write(&file, &data).unwrap();

        poke(
            dir.path(),
            &[entry("tool", &placeholder, FileMode::Binary)],
        )
        .unwrap();

        let patched = fs::read(&file).unwrap();
        assert_eq!(patched.len(), data.len());
        let prefix = dir.path().to_string_lossy().into_owned();
        assert!(patched
            .windows(prefix.len())
            .any(|w| w == prefix.as_bytes()));
        assert!(!patched
            .windows(placeholder.len())
            .any(|w| w == placeholder.as_bytes()));
        // The replacement is NUL-padded up to the placeholder length.
        let start = 4 + prefix.len();
        assert!(patched[start..4 + placeholder.len()].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_binary_patch_rejects_longer_install_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        fs::write(&file, b"/p\x00").unwrap();

        let err = poke(dir.path(), &[entry("tool", "/p", FileMode::Binary)]).unwrap_err();
        match err {
            PoksError::PrefixTooLong {
                install_len,
                placeholder_len,
                ..
            } => {
                assert!(install_len > placeholder_len);
                assert_eq!(placeholder_len, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_poke_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        fs::write(&file, "root=/opt/placeholder-prefix-padding-padding").unwrap();
        let patches = [entry(
            "conf",
            "/opt/placeholder-prefix-padding-padding",
            FileMode::Text,
        )];

        poke(dir.path(), &patches).unwrap();
        let first = fs::read(&file).unwrap();
        poke(dir.path(), &patches).unwrap();
        assert_eq!(fs::read(&file).unwrap(), first);
    }

    #[test]
    fn test_backslash_placeholder_patches_both_forms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        fs::write(
            &file,
            "a=C:\\bld\\prefix\\longer\\than\\real\nb=C:/bld/prefix/longer/than/real\n",
        )
        .unwrap();

        poke(
            dir.path(),
            &[entry(
                "conf",
                "C:\\bld\\prefix\\longer\\than\\real",
                FileMode::Text,
            )],
        )
        .unwrap();

        let content = fs::read_to_string(&file).unwrap();
        assert!(!content.contains("bld"));
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        poke(dir.path(), &[entry("nope", "/opt/p", FileMode::Text)]).unwrap();
    }
}

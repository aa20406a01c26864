//! Variable expansion and archive resolution for manifests.

use crate::error::{PoksError, Result};
use crate::manifest::{PoksAppVersion, PoksArchive};
use std::collections::HashMap;

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace `${key}` placeholders with values from `variables`.
///
/// A single left-to-right pass; replacement text is never re-scanned, so
/// there is no recursive expansion. A placeholder naming an unknown variable
/// is an error. Text that merely looks like a placeholder (`${`, `${a b}`)
/// is passed through verbatim.
pub fn expand_variables(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        if !is_variable_name(name) {
            out.push_str(&rest[start..start + 2 + end + 1]);
        } else if let Some(value) = variables.get(name) {
            out.push_str(value);
        } else {
            return Err(PoksError::VariableUnresolved {
                name: name.to_string(),
                template: template.to_string(),
            });
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Return the first archive matching the given OS and architecture.
///
/// Selection is deterministic on declaration order within the manifest.
pub fn resolve_archive<'a>(
    version: &'a PoksAppVersion,
    target_os: &str,
    target_arch: &str,
) -> Result<&'a PoksArchive> {
    version
        .archives
        .iter()
        .find(|a| a.os == target_os && a.arch == target_arch)
        .ok_or_else(|| PoksError::UnsupportedPlatform {
            os: target_os.to_string(),
            arch: target_arch.to_string(),
            available: version
                .archives
                .iter()
                .map(|a| format!("({}, {})", a.os, a.arch))
                .collect(),
        })
}

/// Build the fully-expanded download URL for the given archive.
///
/// Uses `archive.url` when present, otherwise the version-level template.
/// The mapping covers `version`, `os`, `arch` and, when the archive carries
/// one, `ext`; a `${ext}` placeholder with no archive ext fails expansion.
pub fn resolve_download_url(version: &PoksAppVersion, archive: &PoksArchive) -> Result<String> {
    let template = archive
        .url
        .as_deref()
        .or(version.url.as_deref())
        .ok_or_else(|| {
            PoksError::ManifestInvalid(format!(
                "version '{}' archive ({}, {}) has no url and no version-level url template",
                version.version, archive.os, archive.arch
            ))
        })?;

    let mut variables = HashMap::from([
        ("version".to_string(), version.version.clone()),
        ("os".to_string(), archive.os.clone()),
        ("arch".to_string(), archive.arch.clone()),
    ]);
    if let Some(ext) = &archive.ext {
        variables.insert("ext".to_string(), ext.clone());
    }
    expand_variables(template, &variables)
}

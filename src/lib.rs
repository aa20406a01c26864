//! Poks - cross-platform package manager for pre-built developer tools.
//!
//! Poks fetches, verifies, extracts, and activates binary tools described by
//! JSON manifests hosted in git "bucket" repositories. Everything installs
//! under a user-owned root directory, no elevated privileges required, and
//! versions are pinned exactly for reproducibility.
//!
//! # Architecture
//!
//! - **manifest.rs**: typed records for manifests, buckets and config
//! - **platform.rs**: canonical host (os, arch) detection
//! - **resolver.rs**: `${var}` expansion and per-platform archive selection
//! - **bucket.rs**: git-backed bucket sync and manifest lookup
//! - **download.rs**: streaming HTTP downloads, SHA-256 verify, content cache
//! - **extract.rs**: safe extraction of zip/tar/7z/conda archives
//! - **poker.rs**: prefix patching for relocatable conda payloads
//! - **environment.rs**: PATH and env-var collection for activated toolsets
//! - **engine.rs**: the install orchestrator tying it all together
//!
//! # Quick Start
//!
//! ```no_run
//! use poks::Poks;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let poks = Poks::new(Poks::default_root())?;
//!     let report = poks.install_app("ripgrep", Some("14.1.0"), Some("main")).await?;
//!     for app in &report.apps {
//!         println!("{} {} -> {}", app.name, app.version, app.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod cancel;
pub mod download;
pub mod engine;
pub mod environment;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod platform;
pub mod poker;
pub mod progress;
pub mod resolver;

// Re-export commonly used types and functions
pub use cancel::CancelToken;
pub use engine::{
    AppInstall, InstallReport, InstallStatus, InstalledApp, MANIFEST_FILE_NAME, Poks, SearchHit,
};
pub use environment::{collect_env_updates, merge_env_updates};
pub use error::{PoksError, Result};
pub use extract::extract_archive;
pub use manifest::{
    PoksApp, PoksAppVersion, PoksArchive, PoksBucket, PoksConfig, PoksManifest,
};
pub use poker::{FileMode, PatchEntry, poke};
pub use progress::Reporter;

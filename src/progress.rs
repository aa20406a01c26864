//! Shared progress reporting for parallel downloads.
//!
//! A single [`Reporter`] wraps an `indicatif::MultiProgress`; it is cheap to
//! clone and safe to share across workers, so all bars render through one
//! synchronized console resource.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::env;

/// Whether progress bars and styling should be rendered at all.
pub fn should_show_progress() -> bool {
    use atty::Stream;

    if !atty::is(Stream::Stderr) {
        return false;
    }
    if env::var_os("POKS_NO_COLOR").is_some() || env::var_os("NO_COLOR").is_some() {
        return false;
    }
    true
}

#[derive(Clone, Default)]
pub struct Reporter {
    mp: Option<MultiProgress>,
}

impl Reporter {
    /// A reporter that renders when stderr is a styled TTY.
    pub fn new() -> Self {
        if should_show_progress() {
            Self {
                mp: Some(MultiProgress::new()),
            }
        } else {
            Self::disabled()
        }
    }

    /// A reporter that never renders; used by library callers and tests.
    pub fn disabled() -> Self {
        Self { mp: None }
    }

    /// Add a byte-progress bar for a download. Returns `None` when the
    /// reporter is disabled; callers simply skip position updates.
    pub fn download_bar(&self, name: &str, total: Option<u64>) -> Option<ProgressBar> {
        let mp = self.mp.as_ref()?;
        let pb = mp.add(ProgressBar::new(total.unwrap_or(0)));
        let style = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .ok()?
            .progress_chars("━━╸");
        pb.set_style(style);
        pb.set_message(format!("Downloading {name}"));
        Some(pb)
    }

    pub fn finish_download(&self, pb: Option<ProgressBar>, name: &str) {
        if let Some(pb) = pb {
            pb.finish_with_message(format!("✓ {name}"));
        }
    }
}

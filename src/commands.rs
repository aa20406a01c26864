use owo_colors::OwoColorize;
use poks::{InstallReport, InstallStatus, Poks, Result};

/// Print one status line per app plus the final summary; returns the
/// strongest exit code among per-app failures.
pub fn print_report(report: &InstallReport) -> i32 {
    for app in &report.apps {
        match app.status {
            InstallStatus::Installed => {
                println!("{} {}@{}", "✓".green(), app.name.bold(), app.version);
            }
            InstallStatus::SkippedExisting => {
                println!(
                    "{} {}@{} {}",
                    "→".cyan(),
                    app.name.bold(),
                    app.version,
                    "(already installed)".dimmed()
                );
            }
            InstallStatus::SkippedPlatform => {
                println!(
                    "{} {}@{} {}",
                    "→".cyan(),
                    app.name.bold(),
                    app.version,
                    "(not for this platform)".dimmed()
                );
            }
            InstallStatus::SkippedCancelled => {
                println!(
                    "{} {}@{} {}",
                    "→".yellow(),
                    app.name.bold(),
                    app.version,
                    "(cancelled)".dimmed()
                );
            }
            InstallStatus::Failed => {
                println!(
                    "{} {}@{} {}",
                    "✗".red(),
                    app.name.bold(),
                    app.version,
                    app.error.as_deref().unwrap_or("unknown error").red()
                );
            }
        }
    }

    println!(
        "\n{} installed, {} skipped, {} failed",
        report.installed().to_string().green().bold(),
        report.skipped(),
        report.failed().to_string().red().bold()
    );
    report.exit_code()
}

pub fn search(poks: &Poks, query: &str) -> Result<i32> {
    let hits = poks.search(query)?;
    if hits.is_empty() {
        println!("No manifests found matching '{query}'");
        return Ok(0);
    }
    for hit in hits {
        println!(
            "{}/{} {} {}",
            hit.bucket.cyan(),
            hit.name.bold(),
            format!("({})", hit.versions.join(", ")).dimmed(),
            hit.description
        );
    }
    Ok(0)
}

pub fn list(poks: &Poks) -> Result<i32> {
    let installed = poks.list()?;
    if installed.is_empty() {
        println!("No apps installed");
        return Ok(0);
    }
    for app in installed {
        println!(
            "{} {} {}",
            app.name.bold(),
            app.version,
            app.install_dir.display().to_string().dimmed()
        );
    }
    Ok(0)
}

pub fn cache_clear(poks: &Poks) -> Result<i32> {
    poks.cache_clear()?;
    println!("{} Cache cleared", "✓".green());
    Ok(0)
}

pub fn cache_size(poks: &Poks) -> Result<i32> {
    let bytes = poks.cache_size()?;
    println!("{} ({bytes} bytes)", format_size(bytes).bold());
    Ok(0)
}

fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes >= MIB as u64 {
        format!("{:.1} MiB", bytes as f64 / MIB)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

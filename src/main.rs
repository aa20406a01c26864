mod commands;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use poks::{Poks, Reporter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "poks")]
#[command(author, version, about = "Fetch, verify and activate pre-built developer tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory (overrides POKS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install apps from a config file, a bucket, or a manifest
    Install {
        /// App to install (name or name@version)
        app: Option<String>,

        /// Path to a poks.json configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Bucket name or git URL to resolve the app from
        #[arg(long)]
        bucket: Option<String>,

        /// Install directly from a manifest file (requires --version)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Version to install with --manifest
        #[arg(long)]
        version: Option<String>,
    },

    /// Uninstall apps
    Uninstall {
        /// App to uninstall (name or name@version)
        app: Option<String>,

        /// Uninstall every installed app
        #[arg(long)]
        all: bool,

        /// Do not fail when the target is not installed
        #[arg(long)]
        missing_ok: bool,
    },

    /// Search manifests in synced buckets
    Search {
        /// Case-insensitive substring to match app names against
        query: String,
    },

    /// List installed apps
    List,

    /// Manage the archive cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete all cached archives
    Clear,
    /// Show the cache size
    Size,
}

fn usage_error(message: &str) -> i32 {
    eprintln!("{} {message}", "error:".red().bold());
    2
}

async fn run(command: Commands, root: PathBuf) -> poks::Result<i32> {
    let poks = Poks::new(root)?.with_reporter(Reporter::new());

    match command {
        Commands::Install {
            app,
            config,
            bucket,
            manifest,
            version,
        } => {
            // Ctrl-C flips the shared token; workers drain as skipped-cancelled.
            let cancel = poks.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let report = if let Some(config_path) = config {
                poks.install_from_file(&config_path).await?
            } else if let Some(manifest_path) = manifest {
                let Some(version) = version else {
                    return Ok(usage_error("--manifest requires --version"));
                };
                poks.install_from_manifest(&manifest_path, &version).await?
            } else if let Some(spec) = app {
                let (name, version) = match spec.split_once('@') {
                    Some((name, version)) => (name, Some(version)),
                    None => (spec.as_str(), None),
                };
                poks.install_app(name, version, bucket.as_deref()).await?
            } else {
                return Ok(usage_error(
                    "specify an app, --config, or --manifest with --version",
                ));
            };
            Ok(commands::print_report(&report))
        }

        Commands::Uninstall {
            app,
            all,
            missing_ok,
        } => {
            if all {
                poks.uninstall_all()?;
                println!("{} All apps removed", "✓".green());
            } else if let Some(spec) = app {
                match spec.split_once('@') {
                    Some((name, version)) => poks.uninstall(name, Some(version), missing_ok)?,
                    None => poks.uninstall(&spec, None, missing_ok)?,
                }
                println!("{} Removed {}", "✓".green(), spec.bold());
            } else {
                return Ok(usage_error("specify an app to uninstall or use --all"));
            }
            Ok(0)
        }

        Commands::Search { query } => commands::search(&poks, &query),
        Commands::List => commands::list(&poks),
        Commands::Cache { action } => match action {
            CacheAction::Clear => commands::cache_clear(&poks),
            CacheAction::Size => commands::cache_size(&poks),
        },
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(Poks::default_root);

    let code = match run(cli.command, root).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            err.exit_code()
        }
    };
    std::process::exit(code);
}

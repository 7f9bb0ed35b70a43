mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use cmsync::error::format_bytes;
use cmsync::sync::{JobState, SyncReport};
use cmsync::{
    Classification, ClassifiedUnit, CmisBackend, Config, IgnoreRules, ModuleRegistry,
    PathClassifier, PublishList, RepositoryClient, SyncEngine, SyncOptions, SyncProgress,
};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().as_str()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    cli.validate()?;

    let config = Config::load(cli.config.as_deref())?;
    let registry = Arc::new(ModuleRegistry::from_config(&config));
    let ignore = Arc::new(config.ignore_rules()?);
    let paths = absolute_paths(cli.paths())?;

    match &cli.command {
        Command::Modules => print_modules(&registry, cli.json)?,
        Command::Classify { .. } => {
            let classification = PathClassifier::new(&registry, &ignore).classify(&paths);
            print_classification(&classification, cli.json)?;
        }
        Command::Publish { .. } => {
            let classification = PathClassifier::new(&registry, &ignore).classify(&paths);
            for notice in classification.warnings() {
                tracing::warn!("{}", notice);
            }
            println!("{}", PublishList::from(&classification).to_json()?);
        }
        Command::Sync { dry_run, .. } => {
            run_sync(&cli, &config, registry, ignore, paths, *dry_run).await?;
        }
    }

    Ok(())
}

async fn run_sync(
    cli: &Cli,
    config: &Config,
    registry: Arc<ModuleRegistry>,
    ignore: Arc<IgnoreRules>,
    paths: Vec<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let connection = &config.connection;
    let backend = CmisBackend::new(
        &connection.url,
        &connection.username,
        connection.password.clone(),
        Duration::from_secs(connection.timeout_secs),
    )?;

    let options = SyncOptions {
        dry_run,
        json: cli.json,
        webapp_root: config.webapp_root(),
    };
    let mut engine = SyncEngine::new(registry, ignore, RepositoryClient::new(backend), options);

    if !cli.quiet && !cli.json {
        println!("cmsync v{}", env!("CARGO_PKG_VERSION"));
        println!("Syncing {} path(s) with {}", paths.len(), connection.url);
        if dry_run {
            println!("Mode: Dry-run (no changes will be made)\n");
        }
    }

    let progress = SyncProgress::new().with_bar(cli.quiet || cli.json);

    // Ctrl-C stops the job at the next entity boundary
    let cancel = progress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancellation requested, stopping after the current entity");
            cancel.cancel();
        }
    });

    let worker_progress = progress.clone();
    let worker = tokio::spawn(async move { engine.sync(&paths, &worker_progress).await });
    let report = worker.await.context("Sync worker panicked")??;

    if !cli.json {
        print_report(&report, cli.quiet, dry_run);
    }

    if let Some(error) = report.error {
        return Err(error.into());
    }
    match report.state {
        JobState::Cancelled => anyhow::bail!("Sync cancelled"),
        _ if report.log.has_errors() => {
            anyhow::bail!("Sync finished with {} error(s)", report.stats.failed)
        }
        _ => Ok(()),
    }
}

fn print_report(report: &SyncReport, quiet: bool, dry_run: bool) {
    for notice in report.classification.warnings() {
        eprintln!("{} {}", "warning:".yellow().bold(), notice);
    }

    for line in report.log.lines() {
        if line.starts_with("ERROR:") {
            eprintln!("{}", line.red());
        } else if quiet {
            continue;
        } else if line.starts_with("EXPORT:") {
            println!("{}", line.cyan());
        } else {
            println!("{}", line);
        }
    }

    if quiet {
        return;
    }

    let headline = match report.state {
        JobState::Finished if dry_run => "✓ Dry-run complete (no changes made)".green().bold(),
        JobState::Finished if report.log.has_errors() => "⚠ Sync finished with errors".yellow().bold(),
        JobState::Finished => "✓ Sync complete".green().bold(),
        JobState::Cancelled => "⚠ Sync cancelled".yellow().bold(),
        _ => "✗ Sync failed".red().bold(),
    };
    println!("\n{}\n", headline);

    let stats = &report.stats;
    println!("  Units:             {}", report.classification.units.len().to_string().blue());
    println!("  Pushed:            {}", count(stats.pushed).green());
    println!("  Pulled:            {}", count(stats.pulled).green());
    println!("  Deleted:           {}", count(stats.deleted).red());
    if stats.exported > 0 {
        println!("  Exported:          {}", stats.exported.to_string().cyan());
    }
    if stats.failed > 0 {
        println!("  Failed:            {}", stats.failed.to_string().red().bold());
    }
    println!();
    println!("  Bytes transferred: {}", format_bytes(stats.bytes_transferred).cyan());
    println!("  Duration:          {}", format_duration(report.duration).cyan());
}

fn count(n: usize) -> colored::ColoredString {
    if n > 0 {
        n.to_string().normal()
    } else {
        n.to_string().bright_black()
    }
}

fn print_classification(classification: &Classification, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(classification)?);
        return Ok(());
    }

    for unit in &classification.units {
        match unit {
            ClassifiedUnit::Resource {
                module,
                real_path,
                vfs_path,
            } => println!(
                "{:<14} {}  ({}, {})",
                "resource".green(),
                vfs_path,
                module,
                real_path.display()
            ),
            ClassifiedUnit::ResourcePath { module, vfs_path } => {
                println!("{:<14} {}  ({})", "resource-path".cyan(), vfs_path, module)
            }
        }
    }
    for notice in &classification.notices {
        if notice.is_warning() {
            eprintln!("{} {}", "warning:".yellow().bold(), notice);
        } else {
            eprintln!("{} {}", "note:".bright_black(), notice);
        }
    }
    Ok(())
}

fn print_modules(registry: &ModuleRegistry, json: bool) -> Result<()> {
    if registry.is_empty() {
        println!("No modules configured");
        return Ok(());
    }

    for module in registry.all_modules() {
        if json {
            let value = serde_json::json!({
                "name": module.name,
                "content_root": module.content_root,
                "local_vfs_root": module.local_vfs_root,
                "sync_mode": module.sync_mode,
                "export_site_root": module.export_site_root,
                "version": module.version,
                "resources": module.resources,
            });
            println!("{}", serde_json::to_string(&value)?);
            continue;
        }

        println!("{} ({})", module.name.bold(), module.sync_mode);
        println!("  root:      {}", module.content_root.display());
        println!("  vfs root:  {}", module.local_vfs_root.display());
        println!("  site root: {}", module.export_site_root);
        if let Some(version) = &module.version {
            println!("  version:   {}", version);
        }
        for resource in &module.resources {
            println!("  resource:  {}", resource);
        }
        for point in &module.export_points {
            println!("  export:    {} -> {}", point.vfs_source, point.target.display());
        }
    }
    Ok(())
}

/// Anchor selected paths absolutely so they compare against module roots
fn absolute_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir().context("Cannot determine current directory")?;
    Ok(paths
        .iter()
        .map(|path| {
            let joined = if path.is_absolute() {
                path.clone()
            } else {
                cwd.join(path)
            };
            std::fs::canonicalize(&joined).unwrap_or(joined)
        })
        .collect())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}

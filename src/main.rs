use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use companion_core::metadata::pdf;
use companion_core::{watch, Companion, FsVault, MediaKind, Outcome, ScanSummary, Settings};

#[derive(Parser)]
#[command(name = "media-companion", version, about = "Keep Markdown companion notes in sync with vault media")]
struct Cli {
    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Log decisions as well as writes
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update notes for every managed file (source folders apply)
    Scan {
        #[arg(long, value_enum)]
        kind: Option<MediaKind>,
    },
    /// Create or update the note for one file
    Process {
        /// Vault-relative path of the media file
        file: String,
        /// Treat the file as this kind instead of classifying by extension
        #[arg(long, value_enum)]
        kind: Option<MediaKind>,
        /// Ignore source-folder restrictions
        #[arg(long)]
        force: bool,
    },
    /// Create or update notes for everything under a folder, ignoring source folders
    Folder { dir: String },
    /// Delete the notes that link to a file
    Delete {
        file: String,
        #[arg(long, value_enum)]
        kind: Option<MediaKind>,
    },
    /// Open the note of a media file
    Open {
        file: String,
        /// Print the note path instead of opening it
        #[arg(long)]
        print: bool,
    },
    /// Open the media file a note links to
    Source {
        note: String,
        #[arg(long)]
        print: bool,
    },
    /// Create notes for new files as they appear, until Ctrl-C
    Watch,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the effective settings as JSON
    Show,
    /// Change one option, e.g. `image.folder Media/Images`
    Set { key: String, value: String },
    /// Restore the defaults
    Reset,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let root = cli
        .vault
        .canonicalize()
        .with_context(|| format!("vault {} not found", cli.vault.display()))?;

    if let Command::Settings { action } = &cli.command {
        return settings_command(&root, action);
    }

    let mut companion = open_companion(&root)?;
    let t_total = std::time::Instant::now();

    match cli.command {
        Command::Scan { kind } => {
            let summary = with_progress(|progress| companion.scan_and_process(kind, progress))?;
            report_summary(&summary, t_total);
        }
        Command::Process { file, kind, force } => {
            let outcome = companion.process_single(&file, kind, force)?;
            match &outcome {
                Outcome::Ineligible => eprintln!("{} is outside the source folders (use --force)", file),
                Outcome::UpToDate(note) => eprintln!("Up to date: {}", note),
                Outcome::Updated(note) => eprintln!("Updated {}", note),
                Outcome::Created(note) | Outcome::CreatedCopy(note) => eprintln!("Created {}", note),
                Outcome::CreatedByOther(note) => eprintln!("Already created: {}", note),
            }
        }
        Command::Folder { dir } => {
            let summary = with_progress(|progress| companion.process_folder(&dir, progress))?;
            report_summary(&summary, t_total);
        }
        Command::Delete { file, kind } => {
            let deleted = companion.delete_notes_for(&file, kind)?;
            if deleted.is_empty() {
                eprintln!("No notes link to {}", file);
            }
            for note in deleted {
                println!("{}", note);
            }
        }
        Command::Open { file, print } => match companion.open_note_for(&file)? {
            Some(note) => show(&root, &note, print)?,
            None => anyhow::bail!("no note links to {}", file),
        },
        Command::Source { note, print } => match companion.open_referenced_source(&note)? {
            Some(source) => show(&root, &source.path, print)?,
            None => anyhow::bail!("{} does not link to a file in the vault", note),
        },
        Command::Watch => {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).context("installing Ctrl-C handler")?;
            watch::watch(&mut companion, &stop)?;
        }
        Command::Settings { .. } => unreachable!("handled before the vault is opened"),
    }

    Ok(())
}

/// Everything that must work before any trigger runs: the vault, its
/// settings and the configured PDF rasterizer.
fn open_companion(root: &Path) -> anyhow::Result<Companion<FsVault>> {
    let vault = FsVault::open(root)?;
    let settings = Settings::load(root).context("unreadable settings")?;
    let rasterizer = pdf::rasterizer_for(&settings.thumbnails).context("PDF thumbnails are enabled")?;
    let mut companion = Companion::new(vault, settings);
    companion.set_rasterizer(rasterizer);
    Ok(companion)
}

fn settings_command(root: &Path, action: &SettingsAction) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = Settings::load(root)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::Set { key, value } => {
            let settings = Settings::load(root)?.set(key, value)?;
            settings.save(root)?;
            eprintln!("{} updated", key);
        }
        SettingsAction::Reset => {
            Settings::default().save(root)?;
            eprintln!("Settings reset to defaults");
        }
    }
    Ok(())
}

fn with_progress<T>(
    run: impl FnOnce(&companion_core::ProgressCallback<'_>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap(),
    );
    let result = run(&|_stage, current, total, message| {
        pb.set_length(total);
        pb.set_position(current);
        pb.set_message(message.to_string());
    });
    pb.finish_and_clear();
    result
}

fn report_summary(summary: &ScanSummary, started: std::time::Instant) {
    eprintln!(
        "Done! {} files, {} notes created, {} updated, {} up to date, {} outside source folders, {} failed ({:.2}s)",
        summary.total,
        summary.created,
        summary.updated,
        summary.up_to_date,
        summary.ineligible,
        summary.failed.len(),
        started.elapsed().as_secs_f64()
    );
    for (path, error) in &summary.failed {
        eprintln!("  {}: {}", path, error);
    }
}

fn show(root: &Path, path: &str, print: bool) -> anyhow::Result<()> {
    if print {
        println!("{}", path);
        return Ok(());
    }
    opener::open(root.join(path)).with_context(|| format!("opening {}", path))
}

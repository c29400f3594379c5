use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use vidshelf_core::media::convert::{ConversionEvent, ConversionStatus};
use vidshelf_core::media::rename::RenameError;
use vidshelf_core::media::scanner::ScanEvent;
use vidshelf_core::media::VideoLibrary;
use vidshelf_core::{DataPaths, VideoManager, VideoRecord};

#[derive(Parser, Debug)]
#[command(name = "vidshelf", version, about = "CLI for managing a local video library")]
struct Cli {
    /// Data directory (database, thumbnails, trash)
    #[arg(long, global = true, value_name = "DIR", env = "VIDSHELF_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage watched folders
    Folders {
        #[command(subcommand)]
        command: FoldersCmd,
    },

    /// Scan watched folders (or one folder) and print videos as they are ready
    Scan {
        /// Scan only this folder
        #[arg(long, value_name = "DIR")]
        folder: Option<PathBuf>,
    },

    /// List videos from the last completed scans
    List {
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        /// Only videos carrying this tag
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,
    },

    /// Rename files in one folder to a zero-padded sequence (001.mp4, 002.mkv, ...)
    Rename {
        /// Files to rename, in order
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Only show what would be renamed
        #[arg(long)]
        dry_run: bool,
    },

    /// Rename a single file
    Mv {
        file: PathBuf,
        /// New file name; the extension is kept when omitted
        new_name: String,
    },

    /// Move a file to the trash
    Delete {
        file: PathBuf,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Convert a file to H.264/AAC MP4
    Convert {
        file: PathBuf,
        /// Move the original to the trash after a successful conversion
        #[arg(long)]
        delete_original: bool,
    },

    /// Show or edit per-file metadata
    Meta {
        #[command(subcommand)]
        command: MetaCmd,
    },

    /// Work with the trash
    Trash {
        #[command(subcommand)]
        command: TrashCmd,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum FoldersCmd {
    /// Start watching a folder
    Add { path: PathBuf },
    /// Stop watching a folder
    Remove { path: PathBuf },
    /// List watched folders
    List,
}

#[derive(Subcommand, Debug)]
enum MetaCmd {
    /// Print stored metadata
    Show { file: PathBuf },
    /// Toggle the favorite flag
    Favorite { file: PathBuf },
    /// Add a tag
    Tag { file: PathBuf, tag: String },
    /// Remove a tag
    Untag { file: PathBuf, tag: String },
    /// Record the last playback position in seconds
    Played { file: PathBuf, seconds: f64 },
    /// Set or clear (with an empty string) the product code
    Code { file: PathBuf, code: String },
}

#[derive(Subcommand, Debug)]
enum TrashCmd {
    /// List trashed files
    List,
    /// Restore a trashed file (the latest by default)
    Restore {
        /// Restore a specific record index
        #[arg(long)]
        record: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the current settings
    Show,
    /// Set one setting, e.g. `thumbnail_width 480`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let paths = DataPaths::resolve(cli.data_dir).context("Failed to resolve data directory")?;
    log::debug!("Using data directory {}", paths.root.display());
    let manager = VideoManager::open(paths.clone())
        .with_context(|| format!("Failed to open library in {}", paths.root.display()))?;

    match cli.command {
        Commands::Folders { command } => match command {
            FoldersCmd::Add { path } => {
                let folder = manager
                    .add_folder(&path)
                    .with_context(|| format!("Failed to add folder {}", path.display()))?;
                println!("📁 Watching {} ({})", folder.path.display(), folder.name);
            }
            FoldersCmd::Remove { path } => {
                if manager.remove_folder(&path)? {
                    println!("🧹 Stopped watching {}", path.display());
                } else {
                    println!("{} is not a watched folder.", path.display());
                }
            }
            FoldersCmd::List => {
                let folders = manager.folders()?;
                if folders.is_empty() {
                    println!("No watched folders. Add one with `vidshelf folders add <DIR>`.");
                }
                for folder in folders {
                    println!(
                        "📁 {}: {} video(s)\n     {}",
                        folder.name,
                        folder.video_count,
                        folder.path.display()
                    );
                }
            }
        },

        Commands::Scan { folder } => scan(&manager, folder).await?,

        Commands::List { favorites, tag } => {
            let tag = tag.map(|t| t.trim().to_lowercase());
            let videos: Vec<VideoRecord> = manager
                .load_cached_videos()?
                .into_iter()
                .filter(|v| !favorites || v.is_favorite)
                .filter(|v| tag.as_ref().map_or(true, |t| v.tags.contains(t)))
                .collect();

            if videos.is_empty() {
                println!("No videos. Run `vidshelf scan` first.");
            }
            for video in &videos {
                print_video(video);
            }
        }

        Commands::Rename { files, dry_run } => {
            if dry_run {
                let plan = manager.plan_batch_rename(&files)?;
                for entry in &plan.entries {
                    if entry.skip {
                        println!("   ⏭  {} (already named)", entry.from.display());
                    } else {
                        println!(
                            "   📦 [dry-run] RENAME {} → {}",
                            entry.from.display(),
                            file_name(&entry.to)
                        );
                    }
                }
                for issue in &plan.issues {
                    eprintln!("⚠️  {}", issue);
                }
                println!("\n⚠️  Dry-run only; no files were changed.");
            } else {
                let report = manager.batch_rename(&files);
                for renamed in &report.renamed {
                    println!(
                        "   📦 Renamed {} → {}",
                        renamed.from.display(),
                        file_name(&renamed.to)
                    );
                }
                for skipped in &report.skipped {
                    println!("   ⏭  {} (already named)", skipped.display());
                }
                for error in &report.errors {
                    eprintln!("⚠️  {}", error);
                }

                if report.rollback_failed() {
                    anyhow::bail!(
                        "Rename failed and could not be fully undone; some files may be left under temporary names"
                    );
                }
                if !report.success {
                    let nothing_selected = report
                        .errors
                        .iter()
                        .any(|e| matches!(e, RenameError::NoFilesSelected));
                    if nothing_selected {
                        anyhow::bail!("No files selected");
                    }
                    anyhow::bail!("Rename aborted; nothing was changed");
                }
                println!(
                    "\n✅ {} renamed, {} already in place",
                    report.renamed.len(),
                    report.skipped.len()
                );
            }
        }

        Commands::Mv { file, new_name } => {
            let target = manager
                .rename_video(&file, &new_name)
                .with_context(|| format!("Failed to rename {}", file.display()))?;
            println!("📦 Renamed {} → {}", file.display(), target.display());
        }

        Commands::Delete { file, yes } => {
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Move {} to the trash?", file.display()))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let record = manager
                .delete_video(&file)
                .with_context(|| format!("Failed to delete {}", file.display()))?;
            println!("🗑️  Moved {} to the trash", record.original.display());
        }

        Commands::Convert {
            file,
            delete_original,
        } => convert(&manager, &file, delete_original).await?,

        Commands::Meta { command } => match command {
            MetaCmd::Show { file } => {
                let metadata = manager.metadata(&file)?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
            MetaCmd::Favorite { file } => {
                if manager.toggle_favorite(&file)? {
                    println!("⭐ {} is now a favorite", file.display());
                } else {
                    println!("{} is no longer a favorite", file.display());
                }
            }
            MetaCmd::Tag { file, tag } => {
                let metadata = manager.add_tag(&file, &tag)?;
                println!("🏷️  Tags: {}", join_tags(metadata.tags.iter()));
            }
            MetaCmd::Untag { file, tag } => {
                let metadata = manager.remove_tag(&file, &tag)?;
                println!("🏷️  Tags: {}", join_tags(metadata.tags.iter()));
            }
            MetaCmd::Played { file, seconds } => {
                manager.set_last_played(&file, Some(seconds))?;
                println!("▶ Last played at {}", format_duration(Some(seconds as u64)));
            }
            MetaCmd::Code { file, code } => {
                let metadata = manager.set_product_code(&file, Some(&code))?;
                match metadata.product_code {
                    Some(code) => println!("🔖 Product code {}", code),
                    None => println!("🔖 Product code cleared"),
                }
            }
        },

        Commands::Trash { command } => match command {
            TrashCmd::List => {
                let records = manager.trash_history()?;
                if records.is_empty() {
                    println!("Trash is empty.");
                }
                println!("🗂️  Trash:");
                for (i, record) in records.iter().enumerate() {
                    println!(
                        "[{}] {}\n     original: {}\n     trashed: {}\n",
                        i,
                        record.timestamp,
                        record.original.display(),
                        record.trashed.display()
                    );
                }
            }
            TrashCmd::Restore { record } => {
                let restored = manager
                    .restore_from_trash(record)
                    .context("Failed to restore from trash")?;
                println!("🔄 Restored {}", restored.original.display());
            }
        },

        Commands::Config { command } => match command {
            ConfigCmd::Show => {
                println!("{}", serde_json::to_string_pretty(manager.config())?);
            }
            ConfigCmd::Set { key, value } => {
                if !manager.set_config_value(&key, &value)? {
                    anyhow::bail!("Unknown setting {:?} or invalid value {:?}", key, value);
                }
                println!("✅ {} = {}", key, value);
            }
        },
    }

    Ok(())
}

async fn scan(manager: &VideoManager, folder: Option<PathBuf>) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for videos…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = {
        let spinner = spinner.clone();
        let path_case = manager.config().path_case;
        tokio::spawn(async move {
            let mut library = VideoLibrary::new(path_case);
            while let Some(event) = rx.recv().await {
                match &event {
                    ScanEvent::VideoReady { video } => {
                        spinner.set_message(format!("Scanning {}", video.name));
                        spinner.println(format!(
                            "   ▶ {} [{}]",
                            video.path.display(),
                            format_duration(video.duration)
                        ));
                    }
                    ScanEvent::ScanComplete { folder, total } => {
                        spinner.println(format!(
                            "📁 {}: {} video(s)",
                            folder.display(),
                            total
                        ));
                    }
                }
                library.apply(event);
            }
            library
        })
    };

    let outcomes = match folder {
        Some(folder) => vec![manager.scan_folder(&folder, &tx).await],
        None => manager.scan_all(&tx).await?,
    };
    drop(tx);
    let library = printer.await.context("Scan printer task failed")?;
    spinner.finish_with_message(format!("Scan complete: {} video(s)", library.len()));

    if outcomes.is_empty() {
        println!("No watched folders. Add one with `vidshelf folders add <DIR>`.");
    }
    for outcome in &outcomes {
        if let Some(error) = &outcome.error {
            eprintln!("⚠️  Could not scan {}: {}", outcome.folder.display(), error);
        }
        for tool in &outcome.missing_tools {
            eprintln!(
                "⚠️  {} is not installed; thumbnails or durations are missing",
                tool
            );
        }
    }
    Ok(())
}

async fn convert(manager: &VideoManager, file: &Path, delete_original: bool) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ConversionEvent::Progress {
                        percent, status, ..
                    } => {
                        bar.set_position(percent.round() as u64);
                        if status != ConversionStatus::Converting {
                            bar.set_message(format!("{:?}", status).to_lowercase());
                        }
                    }
                    ConversionEvent::VideoRemoved { path } => {
                        bar.println(format!("🗑️  Moved {} to the trash", path.display()));
                    }
                }
            }
        })
    };

    let result = {
        let conversion = manager.convert(file, delete_original, &tx);
        tokio::pin!(conversion);
        tokio::select! {
            result = &mut conversion => result,
            _ = tokio::signal::ctrl_c() => {
                bar.println("Cancelling…");
                manager.cancel_conversion(file);
                conversion.await
            }
        }
    };
    drop(tx);
    let _ = progress.await;

    match result {
        Ok(result) => {
            bar.finish_with_message("done");
            println!("✅ Converted to {}", result.output.display());
            Ok(())
        }
        Err(e) => {
            bar.abandon();
            Err(e).with_context(|| format!("Failed to convert {}", file.display()))
        }
    }
}

fn print_video(video: &VideoRecord) {
    let star = if video.is_favorite { "⭐" } else { "  " };
    println!(
        "{} {} [{}] {}",
        star,
        video.path.display(),
        format_duration(video.duration),
        format_size(video.size)
    );
    if !video.tags.is_empty() {
        println!("     tags: {}", join_tags(video.tags.iter()));
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn join_tags<'a>(tags: impl Iterator<Item = &'a String>) -> String {
    let tags: Vec<&str> = tags.map(String::as_str).collect();
    if tags.is_empty() {
        "(none)".to_string()
    } else {
        tags.join(", ")
    }
}

fn format_duration(seconds: Option<u64>) -> String {
    match seconds {
        Some(s) if s >= 3600 => format!("{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60),
        Some(s) => format!("{}:{:02}", s / 60, s % 60),
        None => "--:--".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

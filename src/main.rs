use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use media_renamer::coordinator::{FlattenSummary, ModeKind};
use media_renamer::media::is_media_file;
use media_renamer::progress::{LogLine, ProgressUpdate};
use media_renamer::{
    logging, BatchCoordinator, BatchRequest, EngineConfig, FlattenRequest, LogLevel, ProgressSink,
    SortBy, TransferResult,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Rename files where they are
    Inplace,
    /// Move files into the destination folder
    Move,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    /// Name and order by capture date
    Date,
    /// Order by dominant color, name by capture date
    Color,
    /// Name each file after a freshly generated identifier
    Identifier,
}

#[derive(Parser)]
#[command(
    name = "renamer",
    version,
    about = "Deduplicate, rename and file photos and videos",
    long_about = "Rename media files by capture date, color or generated identifier. Duplicates are moved to a quarantine folder, never deleted, and cross-folder moves are verified before the original is removed."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine settings file
    #[arg(long, global = true, value_name = "PATH", help = "TOML file overriding engine defaults")]
    config: Option<PathBuf>,

    /// Print the response as JSON
    #[arg(long, global = true, help = "Print the result as JSON instead of a summary")]
    json: bool,

    /// Skip confirmation prompts
    #[arg(short, long, global = true, help = "Skip confirmation prompts (use with caution)")]
    yes: bool,

    /// Verbose output
    #[arg(short, long, global = true, help = "Show every per-file log line")]
    verbose: bool,

    /// Number of threads to use for parallel hashing and analysis
    #[arg(long, global = true, default_value = "0", help = "Number of threads (0 = auto-detect)")]
    threads: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Deduplicate and rename a batch of media files
    Process {
        /// Files to process; directories contribute their immediate files
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value = "inplace", help = "Where renamed files go")]
        mode: ModeArg,

        #[arg(short, long, value_name = "PATH", help = "Destination folder (required for move mode)")]
        dest: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "date", help = "Naming and ordering strategy")]
        sort_by: SortArg,

        #[arg(long, help = "File into YYYY-MM-DD subfolders")]
        folders: bool,
    },
    /// Move everything under each folder into its parent and remove emptied folders
    Flatten {
        #[arg(required = true, value_name = "FOLDER")]
        folders: Vec<PathBuf>,
    },
}

/// Renders engine notifications on the terminal
struct TerminalSink {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressSink for TerminalSink {
    fn progress(&self, update: ProgressUpdate) {
        if let Some(processed) = update.processed_files {
            self.bar.set_position(processed as u64);
        }
        if let Some(message) = update.message {
            self.bar.set_message(message);
        }
    }

    fn log(&self, line: LogLine) {
        let styled = match line.level {
            LogLevel::Error => style(line.message).red(),
            LogLevel::Success => style(line.message).green(),
            LogLevel::Info => style(line.message).cyan(),
            LogLevel::Log if self.verbose => style(line.message).dim(),
            LogLevel::Log => return,
        };
        if self.bar.is_hidden() {
            eprintln!("{styled}");
        } else {
            self.bar.println(styled.to_string());
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init(if args.verbose { "debug" } else { "warn" });

    // Set up thread pool if specified
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Process {
            ref paths,
            mode,
            ref dest,
            sort_by,
            folders,
        } => {
            let files = collect_inputs(paths);
            let media_count = files.iter().filter(|path| is_media_file(path)).count();

            let mode = match mode {
                ModeArg::Inplace => ModeKind::InPlace,
                ModeArg::Move => ModeKind::Move,
            };
            if mode == ModeKind::Move && dest.is_none() {
                eprintln!("{}", style("Error: --dest is required when using move mode").red());
                std::process::exit(1);
            }

            if !args.json {
                println!(
                    "{}",
                    style(format!("🔍 {media_count} media files selected")).cyan().bold()
                );
            }
            if media_count > 0 && !confirm(&args, "Rename and deduplicate these files?")? {
                println!("{}", style("Operation cancelled").yellow());
                return Ok(());
            }

            let bar = progress_bar(media_count as u64, args.json);
            let mut coordinator = BatchCoordinator::new(config);
            coordinator.set_sink(Arc::new(TerminalSink {
                bar: bar.clone(),
                verbose: args.verbose,
            }));

            let response = coordinator.process(BatchRequest {
                file_paths: files,
                destination_folder: dest.clone(),
                mode,
                sort_by: match sort_by {
                    SortArg::Date => SortBy::Date,
                    SortArg::Color => SortBy::Color,
                    SortArg::Identifier => SortBy::Identifier,
                },
                sort_into_folders: folders,
            });
            bar.finish_and_clear();

            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let Some(results) = &response.results {
                display_results(results);
            }

            if let Some(error) = response.error {
                if !args.json {
                    eprintln!("{}", style(format!("Error: {error}")).red());
                }
                std::process::exit(1);
            }
        }
        Command::Flatten { ref folders } => {
            if !args.json {
                println!(
                    "{}",
                    style(format!("📂 Flattening {} folder(s)", folders.len())).cyan().bold()
                );
            }
            if !confirm(&args, "Move all contained files up one level and remove emptied folders?")? {
                println!("{}", style("Operation cancelled").yellow());
                return Ok(());
            }

            let bar = progress_bar(0, true);
            let mut coordinator = BatchCoordinator::new(config);
            coordinator.set_sink(Arc::new(TerminalSink {
                bar,
                verbose: args.verbose,
            }));
            let response = coordinator.flatten(FlattenRequest {
                folder_paths: folders.clone(),
            });

            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                display_flatten(&response.results);
            }
        }
    }

    Ok(())
}

fn confirm(args: &Cli, prompt: &str) -> Result<bool> {
    if args.yes {
        return Ok(true);
    }
    Ok(dialoguer::Confirm::new().with_prompt(prompt).interact()?)
}

fn progress_bar(len: u64, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        Ok(style) => bar.set_style(style.progress_chars("##-")),
        Err(_) => bar.set_style(ProgressStyle::default_bar()),
    }
    bar
}

/// Expand directories one level; everything else is passed through
fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file());
            files.extend(walker.map(|entry| entry.into_path()));
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn display_results(results: &TransferResult) {
    println!();
    println!("{}", style("📊 Batch Summary").green().bold());
    println!("{}", style("-".repeat(20)).green());
    println!("Media files: {}", results.total_files);
    println!("Files renamed: {}", results.files_renamed);
    println!("Duplicates quarantined: {}", results.duplicates_quarantined);
    if results.skipped_files > 0 {
        println!("Skipped: {}", results.skipped_files);
    }

    if !results.quarantined_file_names.is_empty() {
        println!();
        println!(
            "{}",
            style(format!(
                "⚠️  {} duplicate(s) moved to the quarantine folder for recovery",
                results.quarantined_file_names.len()
            ))
            .yellow()
        );
        for name in &results.quarantined_file_names {
            println!("  {name}");
        }
    }

    if !results.errors.is_empty() {
        println!();
        println!("{}", style("❌ Errors:").red().bold());
        for error in &results.errors {
            println!("  {error}");
        }
    }
}

fn display_flatten(summary: &FlattenSummary) {
    println!();
    println!("{}", style("📊 Flatten Summary").green().bold());
    println!("{}", style("-".repeat(20)).green());
    println!("Files extracted: {}", summary.total_files_extracted);
    println!("Folders deleted: {}", summary.total_folders_deleted);

    if !summary.errors.is_empty() {
        println!();
        println!("{}", style("❌ Errors:").red().bold());
        for error in &summary.errors {
            println!("  {error}");
        }
    }
}

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use photodup::batch::{BatchRunner, install_interrupt_handler};
use photodup::duplicates::{self, DUPLICATES_FILE, DuplicateRecord};
use photodup::normalize;
use photodup::perceptual;
use photodup::planner;
use photodup::scan;
use photodup::signature::Signature;
use photodup::store::FingerprintStore;

#[derive(Parser, Debug)]
#[command(name = "photodup", version, about = "Find and consolidate near-duplicate photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deduplicate one or more source trees into a destination directory
    Process {
        /// Destination directory for the consolidated photos
        dest: PathBuf,
        /// Source directories to scan
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Similarity threshold in (0, 1]
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,
        /// Path prefixes to exclude from matching
        #[arg(short, long)]
        ignore: Vec<PathBuf>,
        /// Clear caches before running
        #[arg(long)]
        clean: bool,
        /// Skip EXIF orientation normalization
        #[arg(long)]
        no_normalize: bool,
        /// Worker count (default: available CPU count)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compare an explicit list of files against each other
    Compare {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Similarity threshold in (0, 1]
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            dest,
            sources,
            threshold,
            ignore,
            clean,
            no_normalize,
            workers,
        } => run_process(dest, sources, threshold, ignore, clean, no_normalize, workers),
        Commands::Compare { files, threshold } => run_compare(files, threshold),
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[allow(clippy::too_many_arguments)]
fn run_process(
    dest: PathBuf,
    sources: Vec<PathBuf>,
    threshold: f64,
    mut ignore: Vec<PathBuf>,
    clean: bool,
    no_normalize: bool,
    workers: Option<usize>,
) -> Result<()> {
    // The destination never serves candidates back into itself.
    ignore.push(dest.clone());

    let mut store = FingerprintStore::new(&dest, threshold, ignore.clone())
        .with_context(|| format!("failed to configure store in {}", dest.display()))?;
    if !clean && store.cache_file().exists() {
        println!("Existing fingerprints data found. Loading...");
        store.load_cache()?;
    }
    println!("Max distance of similarity: {}", store.max_distance());

    let mut files = Vec::new();
    for source in &sources {
        files.extend(scan::scan_directory(source, &ignore));
    }
    println!("Processing {} files.", files.len());
    if files.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    let interrupt = install_interrupt_handler()?;
    let runner = BatchRunner::new(workers.unwrap_or_else(default_workers), interrupt)?;

    if !no_normalize {
        println!("Normalizing images...");
        let backup_dir = Arc::new(store.backup_dir().to_path_buf());
        files = runner.run(
            "normalizing",
            backup_dir,
            files,
            move |backup: &PathBuf, path: PathBuf| {
                Ok(normalize::normalize_orientation(backup, &path, clean))
            },
            |_| {},
        )?;
    }

    let need_fingerprint: Vec<PathBuf> = files
        .iter()
        .filter(|path| store.find(path).is_none())
        .cloned()
        .collect();
    if !need_fingerprint.is_empty() {
        println!("Calculating fingerprints for {} files...", need_fingerprint.len());
        let results = runner.run(
            "fingerprinting",
            Arc::new(()),
            need_fingerprint,
            |_, path: PathBuf| perceptual::compute_signature(&path),
            |partial: Vec<Option<Signature>>| {
                merge_signatures(&mut store, partial);
            },
        )?;
        merge_signatures(&mut store, results);
    }

    let store = Arc::new(store);
    let duplicates_file = dest.join(DUPLICATES_FILE);
    let mut record = DuplicateRecord::load(&duplicates_file, threshold);

    // A file unseen by the last run can be a duplicate of anything, so its
    // appearance invalidates every stored duplicate list.
    let has_new = files
        .iter()
        .any(|path| !record.duplicates.contains_key(path.as_path()));
    let need_duplicates = if has_new {
        record.duplicates.clear();
        files.clone()
    } else {
        Vec::new()
    };

    if !need_duplicates.is_empty() {
        println!("Looking for duplicates for {} files...", need_duplicates.len());
        let results = runner.run(
            "matching",
            Arc::clone(&store),
            need_duplicates,
            |store: &FingerprintStore, path: PathBuf| {
                Ok(store
                    .find(&path)
                    .map(|sig| (path.clone(), duplicates::find_duplicates(store, sig))))
            },
            |partial| {
                merge_duplicates(&mut record, partial);
                save_record(&record, &duplicates_file);
            },
        )?;
        merge_duplicates(&mut record, results);
        record.save(&duplicates_file)?;
        println!("Saved.");
    }

    let clusters = planner::plan_clusters(
        &record.duplicates,
        planner::file_date,
        perceptual::image_dimensions,
    );
    let summary = planner::execute_plan(&clusters, &dest)?;
    println!(
        "Processed {} files: {} photo(s) kept, {} duplicate cluster(s), {} file(s) set aside for review.",
        files.len(),
        summary.kept,
        summary.duplicate_clusters,
        summary.reviewed
    );
    Ok(())
}

fn merge_signatures(store: &mut FingerprintStore, results: Vec<Option<Signature>>) {
    for signature in results.into_iter().flatten() {
        store.add(signature);
    }
    match store.save() {
        Ok(()) => println!("Saved."),
        Err(err) => log::error!("failed to save fingerprint cache: {err}"),
    }
}

type DuplicateResult = Option<(PathBuf, Vec<(u32, PathBuf)>)>;

fn merge_duplicates(record: &mut DuplicateRecord, results: Vec<DuplicateResult>) {
    for (path, found) in results.into_iter().flatten() {
        record.duplicates.insert(path, found);
    }
}

/// Checkpoint save; failures are logged rather than escalated so the abort
/// path always runs to completion.
fn save_record(record: &DuplicateRecord, path: &std::path::Path) {
    match record.save(path) {
        Ok(()) => println!("Saved."),
        Err(err) => log::error!("failed to save duplicates file: {err}"),
    }
}

fn run_compare(files: Vec<PathBuf>, threshold: f64) -> Result<()> {
    let staging = tempfile::tempdir().context("failed to create staging directory")?;
    println!("{}", staging.path().display());

    let mut staged = Vec::new();
    for file in &files {
        let name = file
            .file_name()
            .with_context(|| format!("{} has no file name", file.display()))?;
        let target = staging.path().join(name);
        fs::copy(file, &target)
            .with_context(|| format!("failed to stage {}", file.display()))?;
        staged.push(target);
    }

    let mut store = FingerprintStore::new(staging.path(), threshold, Vec::new())?;
    let interrupt = install_interrupt_handler()?;
    let runner = BatchRunner::new(default_workers(), interrupt)?;
    let results = runner.run(
        "fingerprinting",
        Arc::new(()),
        staged.clone(),
        |_, path: PathBuf| perceptual::compute_signature(&path),
        |_| {},
    )?;
    for signature in results.into_iter().flatten() {
        store.add(signature);
    }

    for path in &staged {
        match store.find(path) {
            Some(sig) => {
                let matches = duplicates::find_duplicates(&store, sig);
                if matches.is_empty() {
                    println!("{}: no duplicates", path.display());
                } else {
                    println!("{}:", path.display());
                    for (distance, other) in matches {
                        println!("  {} (distance {distance})", other.display());
                    }
                }
            }
            None => println!("{}: could not be analyzed", path.display()),
        }
    }
    Ok(())
}

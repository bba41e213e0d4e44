use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crateflow::analyzer::basic::TimeDomainKernel;
use crateflow::analyzer::{AnalysisEngine, BatchOptions};
use crateflow::config::Config;
use crateflow::db::models::{SortDir, SortKey, TrackFilter};
use crateflow::db::Database;
use crateflow::fingerprint::Fingerprint;
use crateflow::harmony::HarmonyModel;
use crateflow::mood::MoodClassifier;
use crateflow::playlist::preset::PresetCatalog;
use crateflow::playlist::PlaylistOptimizer;
use crateflow::scanner::{self, metadata, EnumerateOptions};
use crateflow::tasks::TaskRegistry;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "crateflow", version, about = "Audio library analyzer and harmonic playlist sequencer")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to a config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortField {
    Filename,
    Title,
    Artist,
    Bpm,
    Energy,
    Key,
    Duration,
    Analyzed,
}

impl From<SortField> for SortKey {
    fn from(f: SortField) -> Self {
        match f {
            SortField::Filename => SortKey::Filename,
            SortField::Title => SortKey::Title,
            SortField::Artist => SortKey::Artist,
            SortField::Bpm => SortKey::Bpm,
            SortField::Energy => SortKey::Energy,
            SortField::Key => SortKey::Key,
            SortField::Duration => SortKey::Duration,
            SortField::Analyzed => SortKey::AnalyzedAt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register audio files in the library without analyzing them
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Only include files matching these patterns
        #[arg(long)]
        include: Vec<String>,

        /// Skip files and directories matching these patterns
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Analyze audio files (extract features, classify mood, cache results)
    Analyze {
        /// Directories or files to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Re-analyze files even when cached results are fresh
        #[arg(long)]
        overwrite_cache: bool,

        #[arg(long)]
        include: Vec<String>,

        #[arg(long)]
        exclude: Vec<String>,
    },

    /// List library tracks
    List {
        /// Filter by artist substring
        #[arg(long)]
        artist: Option<String>,

        /// Filter by genre substring
        #[arg(long)]
        genre: Option<String>,

        /// Filter by primary mood
        #[arg(long)]
        mood: Option<String>,

        #[arg(long)]
        min_bpm: Option<f64>,

        #[arg(long)]
        max_bpm: Option<f64>,

        #[arg(long)]
        min_energy: Option<f64>,

        #[arg(long)]
        max_energy: Option<f64>,

        /// Free-text search over title, artist, and filename
        #[arg(long)]
        search: Option<String>,

        #[arg(long, value_enum, default_value = "filename")]
        sort: SortField,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show library statistics
    Stats,

    /// Build an ordered playlist from the analyzed library
    Playlist {
        /// Preset name (see `presets`)
        #[arg(long)]
        preset: Option<String>,

        /// Target duration in minutes
        #[arg(long)]
        duration: Option<u32>,

        /// Print the full playlist record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List playlist presets
    Presets {
        /// Show the rules of one preset
        #[arg(long)]
        details: Option<String>,
    },

    /// Remove stale analyzed tracks and compact the store
    Cleanup {
        #[arg(long, default_value = "30")]
        max_age_days: u32,

        #[arg(long, default_value = "1000")]
        max_size_mb: u64,
    },

    /// Drop every track, feature, and task record
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path).context("Failed to load config")?,
        None => Config::load_default().context("Failed to load config")?,
    };

    let db_path = cli.db_path.unwrap_or_else(|| config.db_path());
    log::info!("Database: {}", db_path.display());
    let db = Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Scan { paths, include, exclude } => {
            let opts = enumerate_options(&config, &include, &exclude);
            let files = scanner::enumerate(&paths, &opts);
            println!("Found {} audio files", files.len());

            let pb = progress_bar(files.len() as u64, "Scanning");
            let tx = db.conn.unchecked_transaction()?;
            let mut registered = 0u64;
            let mut errors = 0u64;
            for path in &files {
                let tags = metadata::read_tags(path);
                match db.register_track(path, &tags, &Fingerprint::for_file(path)) {
                    Ok(_) => registered += 1,
                    Err(e) => {
                        log::warn!("failed to register {}: {e}", path.display());
                        errors += 1;
                    }
                }
                pb.inc(1);
            }
            tx.commit()?;
            pb.finish_and_clear();
            println!("Scan complete: {registered} registered, {errors} errors");
        }

        Commands::Analyze { paths, jobs, overwrite_cache, include, exclude } => {
            let opts = enumerate_options(&config, &include, &exclude);
            let mut files = Vec::new();
            for path in &paths {
                if path.is_dir() {
                    files.extend(scanner::enumerate(std::slice::from_ref(path), &opts));
                } else {
                    files.push(path.clone());
                }
            }
            files.sort();
            files.dedup();
            if files.is_empty() {
                println!("No audio files to analyze.");
                return Ok(());
            }

            let mut analysis_config = config.audio_analysis.clone();
            if jobs > 0 {
                analysis_config.workers = jobs;
            }
            if config.mood_classifier.enable_model {
                log::warn!("no mood model backend is compiled in; using the rule engine");
            }
            let registry = Arc::new(TaskRegistry::new());
            let engine = AnalysisEngine::new(
                Arc::new(TimeDomainKernel::new()),
                MoodClassifier::new(config.mood_classifier.confidence_threshold),
                registry.clone(),
                analysis_config,
            );

            let task_id = registry.create(files.len() as u64);
            let pb = progress_bar(files.len() as u64, "Analyzing");
            let pb_clone = pb.clone();
            let progress = move |processed: usize, _total: usize, file: &str| {
                pb_clone.set_position(processed as u64);
                pb_clone.set_message(file.to_string());
            };

            let options = BatchOptions { overwrite_cache };
            let result = engine
                .analyze_batch(&db, &files, &options, Some(task_id.as_str()), Some(&progress))
                .context("Analysis failed")?;
            pb.finish_and_clear();

            let s = result.summary;
            println!(
                "Analysis complete: {} processed, {} successful, {} failed, {} cached",
                s.total_processed, s.successful, s.failed, s.skipped_cached
            );
            if result.cancelled {
                println!("(batch was cancelled before completion)");
            }
            if s.failed > 0 && s.failed == s.total_processed {
                anyhow::bail!("every file failed analysis");
            }
        }

        Commands::List {
            artist, genre, mood, min_bpm, max_bpm, min_energy, max_energy,
            search, sort, desc, limit, offset,
        } => {
            let filter = TrackFilter {
                artist, genre, mood, min_bpm, max_bpm, min_energy, max_energy, search,
            };
            let dir = if desc { SortDir::Desc } else { SortDir::Asc };
            let rows = db.list(&filter, sort.into(), dir, limit, offset)?;

            if rows.is_empty() {
                println!("No tracks found.");
                return Ok(());
            }

            println!(
                "{:<32} {:<20} {:>6} {:>5} {:>7} {:>6} {:<12}",
                "Title", "Artist", "BPM", "Key", "Energy", "Min", "Mood"
            );
            println!("{}", "-".repeat(95));
            for row in &rows {
                println!(
                    "{:<32} {:<20} {:>6} {:>5} {:>7} {:>6.1} {:<12}",
                    truncate(row.title.as_deref().unwrap_or(&row.filename), 32),
                    truncate(row.artist.as_deref().unwrap_or("?"), 20),
                    row.bpm.map(|b| format!("{b:.0}")).unwrap_or_else(|| "-".into()),
                    row.camelot.as_deref().unwrap_or("-"),
                    row.energy.map(|e| format!("{e:.2}")).unwrap_or_else(|| "-".into()),
                    row.duration / 60.0,
                    row.mood.as_deref().unwrap_or("-"),
                );
            }
            println!("{} tracks", rows.len());
        }

        Commands::Stats => {
            let stats = db.stats()?;
            println!("Library Statistics");
            println!("==================");
            println!("Total tracks:     {}", stats.total_tracks);
            println!("Analyzed tracks:  {}", stats.analyzed_tracks);
            println!(
                "Store size:       {:.1} MiB",
                stats.total_size_bytes as f64 / (1024.0 * 1024.0)
            );
            if let (Some(oldest), Some(newest)) = (stats.oldest_at, stats.newest_at) {
                println!("Oldest analysis:  {}", format_epoch(oldest));
                println!("Newest analysis:  {}", format_epoch(newest));
            }
        }

        Commands::Playlist { preset, duration, json } => {
            let summaries = db.list(
                &TrackFilter::default(),
                SortKey::Filename,
                SortDir::Asc,
                usize::MAX >> 1,
                0,
            )?;
            let mut tracks = Vec::new();
            for row in summaries.iter().filter(|r| r.bpm.is_some()) {
                if let Some(analysis) = db.load(&row.file_path)? {
                    tracks.push(analysis);
                }
            }
            log::info!("{} analyzed tracks available", tracks.len());

            let catalog = match &config.playlist_engine.presets_dir {
                Some(dir) => PresetCatalog::with_dir(dir),
                None => PresetCatalog::builtin(),
            };
            let harmony = if config.playlist_engine.relaxed_harmony {
                HarmonyModel::relaxed()
            } else {
                HarmonyModel::new()
            };
            let optimizer = PlaylistOptimizer::new(catalog, harmony);

            let playlist = optimizer
                .create_playlist_with_progress(
                    &tracks,
                    preset.as_deref(),
                    None,
                    duration,
                    &mut |phase| log::info!("{phase}"),
                )
                .context("Playlist generation failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&playlist)?);
                return Ok(());
            }

            println!(
                "Playlist \"{}\" — {} tracks, {:.1} min",
                playlist.preset_used,
                playlist.metadata.total_tracks,
                playlist.metadata.total_duration_minutes
            );
            println!();
            for entry in &playlist.tracks {
                let a = &entry.analysis;
                println!(
                    "{:>3}. {:<40} {:>5} {:>4.0} bpm  {:>4.2}",
                    entry.index + 1,
                    truncate(a.metadata.title.as_deref().unwrap_or(&a.filename), 40),
                    a.camelot.camelot.to_string(),
                    a.features.bpm,
                    a.features.energy,
                );
            }
            println!();
            let b = &playlist.metadata.bpm_stats;
            println!(
                "BPM {:.0}-{:.0} (avg {:.0})  energy avg {:.2}  algorithm {}",
                b.min, b.max, b.avg, playlist.metadata.average_energy, playlist.algorithm
            );
        }

        Commands::Presets { details } => {
            let catalog = match &config.playlist_engine.presets_dir {
                Some(dir) => PresetCatalog::with_dir(dir),
                None => PresetCatalog::builtin(),
            };

            if let Some(name) = details {
                let preset = catalog
                    .get(&name)
                    .with_context(|| format!("preset {name:?} not found"))?;
                println!("{} — {}", preset.name, preset.description);
                println!("algorithm: {}", preset.algorithm);
                if let Some(minutes) = preset.target_duration_minutes {
                    println!("target duration: {minutes} min");
                }
                println!("rules:");
                for rule in &preset.rules {
                    let state = if rule.enabled { "" } else { " (disabled)" };
                    println!("  {:<24} {:.1}{state}  {}", rule.name, rule.weight, rule.description);
                }
                return Ok(());
            }

            println!("{:<28} {:<16} {:>8}  {}", "Preset", "Algorithm", "Target", "Kind");
            println!("{}", "-".repeat(70));
            for preset in catalog.all() {
                let target = preset
                    .target_duration_minutes
                    .map(|m| format!("{m} min"))
                    .unwrap_or_else(|| "-".into());
                let kind = if catalog.is_default(&preset.name) { "default" } else { "custom" };
                println!("{:<28} {:<16} {:>8}  {}", preset.name, preset.algorithm, target, kind);
            }
        }

        Commands::Cleanup { max_age_days, max_size_mb } => {
            let report = db.cleanup(max_age_days, max_size_mb * 1024 * 1024)?;
            println!(
                "Cleanup complete: {} tracks removed, store is {:.1} MiB",
                report.removed_tracks,
                report.current_size_bytes as f64 / (1024.0 * 1024.0)
            );
        }

        Commands::Clear { yes } => {
            if !yes {
                println!("This removes every track and analysis. Re-run with --yes to confirm.");
                return Ok(());
            }
            let removed = db.clear()?;
            println!("Cleared {removed} tracks.");
        }
    }

    Ok(())
}

fn enumerate_options(config: &Config, include: &[String], exclude: &[String]) -> EnumerateOptions {
    let mut include_patterns = config.music_library.include_patterns.clone();
    include_patterns.extend_from_slice(include);
    let mut exclude_patterns = config.music_library.exclude_patterns.clone();
    exclude_patterns.extend_from_slice(exclude);
    EnumerateOptions {
        max_depth: config.music_library.max_depth,
        min_file_size_kb: config.music_library.min_file_size_kb,
        include_patterns,
        exclude_patterns,
    }
}

fn progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());
    pb
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

fn format_epoch(secs: f64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| format!("{secs}"))
}

pub mod basic;
pub mod kernel;
pub mod key;
pub mod record;

use crate::config::AudioAnalysisConfig;
use crate::db::{Database, StoreError};
use crate::fingerprint::Fingerprint;
use crate::harmony::HarmonyModel;
use crate::mood::{MoodClassifier, MoodInput};
use crate::scanner::metadata;
use crate::tasks::{TaskDelta, TaskRegistry, TaskStatus, TaskSummary};
use crate::SUPPORTED_EXTENSIONS;
use crossbeam_channel::RecvTimeoutError;
use kernel::{FeatureKernel, Pcm};
use record::{
    defaults, Analysis, AnalysisStatus, CamelotInfo, DerivedMetrics, GlobalFeatures, MoodInfo,
    TimeSeriesPoint, TrackMetadata, RECORD_VERSION,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Files at or below this size never reach the kernel.
const MIN_FILE_SIZE_BYTES: u64 = 1024;

/// A secondary tempo/key estimator must clear this confidence to be preferred.
const REFINE_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStats {
    pub total_analyzed: u64,
    pub cache_hits: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Re-analyze files even when a fresh cached record exists.
    pub overwrite_cache: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchSummary {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped_cached: u64,
}

#[derive(Debug)]
pub struct BatchResult {
    /// file_path → analysis or fallback record.
    pub results: BTreeMap<String, Analysis>,
    pub summary: BatchSummary,
    pub cancelled: bool,
}

/// Progress callback: (processed, total, current_file).
pub type ProgressFn = dyn Fn(usize, usize, &str);

/// Validate → load → extract → segment → classify → persist, with batching,
/// progress, and cooperative cancellation. Workers are pure CPU-bound tasks
/// returning plain values; this orchestrator owns the store handle.
pub struct AnalysisEngine {
    kernel: Arc<dyn FeatureKernel>,
    classifier: Arc<MoodClassifier>,
    registry: Arc<TaskRegistry>,
    config: AudioAnalysisConfig,
    stats: Mutex<EngineStats>,
}

struct BatchCtx {
    results: BTreeMap<String, Analysis>,
    summary: BatchSummary,
    processed: usize,
    total: usize,
    store_failures: u64,
}

impl AnalysisEngine {
    pub fn new(
        kernel: Arc<dyn FeatureKernel>,
        classifier: MoodClassifier,
        registry: Arc<TaskRegistry>,
        config: AudioAnalysisConfig,
    ) -> Self {
        Self {
            kernel,
            classifier: Arc::new(classifier),
            registry,
            config,
            stats: Mutex::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.lock().unwrap()
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn worker_count(&self) -> usize {
        if self.config.workers > 0 {
            self.config.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(8)
        }
    }

    /// Analyze a batch of files, persisting each record as its worker
    /// result arrives. Per-file failures become fallback records and never
    /// abort the batch.
    pub fn analyze_batch(
        &self,
        db: &Database,
        files: &[PathBuf],
        options: &BatchOptions,
        task_id: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> Result<BatchResult, AnalyzeError> {
        if let Some(tid) = task_id {
            self.registry.update(
                tid,
                TaskDelta { status: Some(TaskStatus::Running), ..Default::default() },
            );
            if let Some(state) = self.registry.get(tid) {
                let _ = db.record_task(&state);
            }
        }

        let mut ctx = BatchCtx {
            results: BTreeMap::new(),
            summary: BatchSummary::default(),
            processed: 0,
            total: files.len(),
            store_failures: 0,
        };
        let mut cancelled = false;

        // Pre-validation and cache probes happen before any work is
        // dispatched; both are cheap and need the store handle.
        let mut work: Vec<PathBuf> = Vec::new();
        for path in files {
            if self.task_cancelled(task_id) {
                cancelled = true;
                break;
            }
            match validate_input(path, &self.config) {
                Err(reason) => {
                    log::warn!("{}: {reason}", path.display());
                    let record = Analysis::fallback(path, reason);
                    self.persist(db, &mut ctx, path, record, task_id, progress);
                }
                Ok(()) => {
                    if !options.overwrite_cache && self.cache_fresh(db, path) {
                        match db.load(&path.to_string_lossy()) {
                            Ok(Some(cached)) => {
                                self.stats.lock().unwrap().cache_hits += 1;
                                ctx.summary.skipped_cached += 1;
                                self.note_processed(&mut ctx, path, cached, task_id, progress);
                                continue;
                            }
                            _ => work.push(path.clone()),
                        }
                    } else {
                        work.push(path.clone());
                    }
                }
            }
        }

        if !cancelled && !work.is_empty() {
            let workers = self.worker_count().min(work.len());
            if work.len() < 2 || workers <= 1 {
                cancelled = self.run_sequential(db, &work, &mut ctx, task_id, progress);
            } else {
                cancelled = self.run_parallel(db, &work, workers, &mut ctx, task_id, progress);
            }
        }

        ctx.summary.total_processed = ctx.processed as u64;

        let status = if cancelled {
            TaskStatus::Cancelled
        } else if ctx.store_failures > 0 && ctx.summary.successful == 0 {
            TaskStatus::Error
        } else {
            TaskStatus::Completed
        };
        if let Some(tid) = task_id {
            self.registry.update(
                tid,
                TaskDelta {
                    status: Some(status),
                    processed: Some(ctx.processed as u64),
                    current_file: Some(None),
                    summary: Some(TaskSummary {
                        successful: ctx.summary.successful,
                        failed: ctx.summary.failed,
                        skipped_cached: ctx.summary.skipped_cached,
                    }),
                    ..Default::default()
                },
            );
            if let Some(state) = self.registry.get(tid) {
                let _ = db.record_task(&state);
            }
        }

        Ok(BatchResult {
            results: ctx.results,
            summary: ctx.summary,
            cancelled,
        })
    }

    /// Analyze one file, honoring the cache. The record (real or fallback)
    /// is persisted before returning.
    pub fn analyze_track(
        &self,
        db: &Database,
        path: &Path,
        overwrite_cache: bool,
    ) -> Result<Analysis, AnalyzeError> {
        if !overwrite_cache && self.cache_fresh(db, path) {
            if let Some(cached) = db.load(&path.to_string_lossy())? {
                self.stats.lock().unwrap().cache_hits += 1;
                return Ok(cached);
            }
        }

        let record = match validate_input(path, &self.config) {
            Err(reason) => Analysis::fallback(path, reason),
            Ok(()) => self.analyze_file(path),
        };

        db.save(&record, &Fingerprint::for_file(path))?;
        let mut stats = self.stats.lock().unwrap();
        if record.status == AnalysisStatus::Completed {
            stats.total_analyzed += 1;
        } else {
            stats.errors += 1;
        }
        Ok(record)
    }

    fn run_sequential(
        &self,
        db: &Database,
        work: &[PathBuf],
        ctx: &mut BatchCtx,
        task_id: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> bool {
        for path in work {
            if self.task_cancelled(task_id) {
                return true;
            }
            let record = self.analyze_file(path);
            self.persist(db, ctx, path, record, task_id, progress);
        }
        false
    }

    fn run_parallel(
        &self,
        db: &Database,
        work: &[PathBuf],
        workers: usize,
        ctx: &mut BatchCtx,
        task_id: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> bool {
        let cancel = AtomicBool::new(false);
        let mut cancelled = false;

        std::thread::scope(|s| {
            let (job_tx, job_rx) = crossbeam_channel::unbounded::<PathBuf>();
            let (result_tx, result_rx) = crossbeam_channel::unbounded::<(PathBuf, Analysis)>();

            for path in work {
                job_tx.send(path.clone()).ok();
            }
            drop(job_tx);

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let cancel = &cancel;
                s.spawn(move || {
                    // Workers check the cancel flag before each dequeue and
                    // never touch the store.
                    while !cancel.load(Ordering::Relaxed) {
                        let path = match job_rx.recv() {
                            Ok(p) => p,
                            Err(_) => break,
                        };
                        let record = self.analyze_file(&path);
                        if result_tx.send((path, record)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Store writes are serialized here, in result-arrival order.
            loop {
                if !cancelled && self.task_cancelled(task_id) {
                    cancelled = true;
                    cancel.store(true, Ordering::Relaxed);
                }
                match result_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok((path, record)) => {
                        if cancelled {
                            log::debug!("discarding in-flight result for {}", path.display());
                            continue;
                        }
                        self.persist(db, ctx, &path, record, task_id, progress);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        cancelled
    }

    /// Persist one record and advance counters, progress, and task state.
    fn persist(
        &self,
        db: &Database,
        ctx: &mut BatchCtx,
        path: &Path,
        record: Analysis,
        task_id: Option<&str>,
        progress: Option<&ProgressFn>,
    ) {
        match db.save(&record, &Fingerprint::for_file(path)) {
            Ok(_) => {
                let mut stats = self.stats.lock().unwrap();
                if record.status == AnalysisStatus::Completed {
                    ctx.summary.successful += 1;
                    stats.total_analyzed += 1;
                } else {
                    ctx.summary.failed += 1;
                    stats.errors += 1;
                }
            }
            Err(e) => {
                log::error!("store write failed for {}: {e}", path.display());
                ctx.summary.failed += 1;
                ctx.store_failures += 1;
                self.stats.lock().unwrap().errors += 1;
                if let Some(tid) = task_id {
                    self.registry.update(
                        tid,
                        TaskDelta { error: Some(format!("store write failed: {e}")), ..Default::default() },
                    );
                }
            }
        }
        self.note_processed(ctx, path, record, task_id, progress);
    }

    fn note_processed(
        &self,
        ctx: &mut BatchCtx,
        path: &Path,
        record: Analysis,
        task_id: Option<&str>,
        progress: Option<&ProgressFn>,
    ) {
        ctx.processed += 1;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(cb) = progress {
            cb(ctx.processed, ctx.total, &filename);
        }
        if let Some(tid) = task_id {
            self.registry.update(
                tid,
                TaskDelta {
                    processed: Some(ctx.processed as u64),
                    current_file: Some(Some(filename)),
                    ..Default::default()
                },
            );
        }
        ctx.results.insert(path.to_string_lossy().to_string(), record);
    }

    fn task_cancelled(&self, task_id: Option<&str>) -> bool {
        task_id.is_some_and(|tid| self.registry.is_cancelled(tid))
    }

    /// A cached row is fresh when the current fingerprint still matches the
    /// stored size and mtime (±1 s tolerance).
    fn cache_fresh(&self, db: &Database, path: &Path) -> bool {
        let key = path.to_string_lossy();
        if !db.is_cached(&key) {
            return false;
        }
        let current = Fingerprint::for_file(path);
        match db.cached_identity(&key) {
            Ok(Some((size, mtime))) => current.matches(size, mtime),
            _ => false,
        }
    }

    /// Worker-side pipeline for a validated file. Hard failures (decode,
    /// zero samples, timeout) produce an error fallback; individual
    /// primitive failures degrade that feature to its safe default and are
    /// noted on the record.
    fn analyze_file(&self, path: &Path) -> Analysis {
        let deadline = Instant::now() + Duration::from_secs(self.config.file_timeout_secs);
        match self.extract_record(path, deadline) {
            Ok(record) => record,
            Err(reason) => {
                log::warn!("{}: {reason}", path.display());
                Analysis::error_fallback(path, reason)
            }
        }
    }

    fn extract_record(&self, path: &Path, deadline: Instant) -> Result<Analysis, String> {
        let kernel = &*self.kernel;
        let mut errors: Vec<String> = Vec::new();

        let mut pcm = kernel
            .load(path, self.config.sample_rate)
            .map_err(|e| e.to_string())?;
        if pcm.samples.is_empty() {
            return Err("decoded zero samples".to_string());
        }
        let duration = pcm.duration_secs();

        if self.config.trim_silence {
            trim_silence(&mut pcm.samples);
        }
        if self.config.normalize {
            peak_normalize(&mut pcm.samples);
        }
        if pcm.samples.is_empty() {
            return Err("audio is entirely silence".to_string());
        }
        check_deadline(deadline)?;

        // Tempo, preferring a confident secondary estimator
        let mut bpm = defaults::BPM;
        match kernel.tempo(&pcm) {
            Ok(t) => bpm = t.bpm,
            Err(e) => errors.push(format!("tempo estimation failed: {e}")),
        }
        if let Some(refined) = kernel.refine_tempo(&pcm) {
            if refined.confidence >= REFINE_CONFIDENCE_THRESHOLD {
                bpm = refined.bpm;
            }
        }

        // Key via chroma correlation, preferring a more confident refiner
        let mut key_name = defaults::KEY.to_string();
        let mut key_confidence = 0.0;
        match kernel.chroma(&pcm) {
            Ok(chroma) => {
                if let Some(est) = key::estimate_key(&chroma) {
                    key_name = est.key;
                    key_confidence = est.confidence;
                }
            }
            Err(e) => errors.push(format!("chroma extraction failed: {e}")),
        }
        if let Some(refined) = kernel.refine_key(&pcm) {
            if refined.confidence > key_confidence {
                key_name = refined.key;
                key_confidence = refined.confidence;
            }
        }
        check_deadline(deadline)?;

        // Spectral descriptors
        let mut spectral_centroid = defaults::SPECTRAL_CENTROID;
        let mut zero_crossing_rate = defaults::ZERO_CROSSING_RATE;
        let mut mfcc_variance = defaults::MFCC_VARIANCE;
        match kernel.spectral(&pcm) {
            Ok(s) => {
                spectral_centroid = s.centroid_hz;
                zero_crossing_rate = s.zero_crossing_rate;
                mfcc_variance = s.mfcc_variance;
            }
            Err(e) => errors.push(format!("spectral extraction failed: {e}")),
        }

        // RMS energy and loudness over the whole signal
        let mut energy = defaults::ENERGY;
        let mut loudness = defaults::LOUDNESS;
        match kernel.window_stats(&pcm, 0, pcm.samples.len()) {
            Ok(w) => {
                energy = w.rms.clamp(0.0, 1.0);
                loudness = if w.rms > 0.0 {
                    (20.0 * w.rms.log10()).clamp(-60.0, 0.0)
                } else {
                    -60.0
                };
            }
            Err(e) => errors.push(format!("energy extraction failed: {e}")),
        }

        // Heuristic valence / danceability
        let mut valence = defaults::VALENCE;
        let mut danceability = defaults::DANCEABILITY;
        match kernel.perceptual(&pcm) {
            Ok(p) => {
                valence = p.valence.clamp(0.0, 1.0);
                danceability = p.danceability.clamp(0.0, 1.0);
            }
            Err(e) => errors.push(format!("perceptual extraction failed: {e}")),
        }
        check_deadline(deadline)?;

        let time_series = match self.extract_time_series(&pcm) {
            Ok(points) => points,
            Err(e) => {
                errors.push(format!("time series extraction failed: {e}"));
                Vec::new()
            }
        };

        let raw = GlobalFeatures {
            bpm,
            energy,
            valence,
            danceability,
            loudness,
            spectral_centroid,
            zero_crossing_rate,
            mfcc_variance,
        };
        let (features, coercions) = raw.sanitized();
        errors.extend(coercions);

        let tags = metadata::read_tags(path);
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let track_metadata = TrackMetadata {
            title: tags.title,
            artist: tags.artist,
            album: tags.album,
            genre: tags.genre,
            year: tags.year,
            duration,
            file_size,
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            analyzed_at: chrono::Utc::now().timestamp() as f64,
        };

        let mood_input = MoodInput {
            energy: features.energy,
            valence: features.valence,
            danceability: features.danceability,
            bpm: features.bpm,
            loudness: features.loudness,
            spectral_centroid: features.spectral_centroid,
            key: (key_name != defaults::KEY).then(|| key_name.clone()),
        };
        let mood: MoodInfo = self.classifier.classify(&mood_input).into();

        let harmony = HarmonyModel::new();
        let camelot = match harmony.to_camelot(&key_name) {
            Some(code) => CamelotInfo {
                key: key_name,
                camelot: code,
                key_confidence,
                compatible_keys: harmony.compatible(code),
            },
            None => CamelotInfo::unknown(),
        };

        let derived_metrics = DerivedMetrics::from_features(&features);

        Ok(Analysis {
            file_path: path.to_string_lossy().to_string(),
            filename: path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default(),
            status: AnalysisStatus::Completed,
            features,
            metadata: track_metadata,
            camelot,
            mood,
            derived_metrics,
            time_series_features: time_series,
            errors,
            version: RECORD_VERSION.to_string(),
        })
    }

    /// Segment the signal into non-overlapping windows of the configured
    /// length. The final window is skipped when shorter than half a window.
    fn extract_time_series(&self, pcm: &Pcm) -> Result<Vec<TimeSeriesPoint>, String> {
        let window_samples = (self.config.window_seconds * pcm.sample_rate as f64) as usize;
        if window_samples == 0 {
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        let mut start = 0;
        while start < pcm.samples.len() {
            let end = (start + window_samples).min(pcm.samples.len());
            if end - start < window_samples / 2 {
                break;
            }
            let stats = self
                .kernel
                .window_stats(pcm, start, end - start)
                .map_err(|e| e.to_string())?;
            points.push(TimeSeriesPoint {
                timestamp: start as f64 / pcm.sample_rate as f64,
                energy_value: stats.rms.clamp(0.0, 1.0),
                brightness_value: stats.centroid_hz,
                spectral_rolloff: stats.rolloff_hz,
                rms_energy: stats.rms.clamp(0.0, 1.0),
                zero_crossing_rate: Some(stats.zero_crossing_rate),
                spectral_bandwidth: Some(stats.bandwidth_hz),
            });
            start += window_samples;
        }
        Ok(points)
    }
}

/// Pre-check: existence, size bounds, and a supported extension.
pub fn validate_input(path: &Path, config: &AudioAnalysisConfig) -> Result<(), String> {
    let meta =
        std::fs::metadata(path).map_err(|e| format!("inaccessible path: {e}"))?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }

    let size = meta.len();
    if size <= MIN_FILE_SIZE_BYTES {
        return Err(format!("file too small: {size} bytes"));
    }
    let max_bytes = config.max_file_size_mb * 1024 * 1024;
    if size > max_bytes {
        return Err(format!("file too large: {size} bytes (limit {max_bytes})"));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!("unsupported extension: {ext:?}"));
    }
    Ok(())
}

fn check_deadline(deadline: Instant) -> Result<(), String> {
    if Instant::now() > deadline {
        Err("extraction exceeded its time budget".to_string())
    } else {
        Ok(())
    }
}

/// Drop leading and trailing samples quieter than 20 dB below peak.
fn trim_silence(samples: &mut Vec<f32>) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 {
        samples.clear();
        return;
    }
    let threshold = peak * 0.1; // -20 dB relative to peak
    let start = samples.iter().position(|s| s.abs() >= threshold).unwrap_or(0);
    let end = samples
        .iter()
        .rposition(|s| s.abs() >= threshold)
        .map(|i| i + 1)
        .unwrap_or(samples.len());
    if start > 0 || end < samples.len() {
        *samples = samples[start..end].to_vec();
    }
}

/// Scale the signal so its peak amplitude is 1.
fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 && (peak - 1.0).abs() > f32::EPSILON {
        let scale = 1.0 / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

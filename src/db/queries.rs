use super::models::{CleanupReport, LibraryStats, SortDir, SortKey, TrackFilter, TrackSummary};
use super::{Database, Result};
use crate::analyzer::record::{
    defaults, Analysis, AnalysisStatus, BpmCategory, CamelotInfo, DerivedMetrics, EnergyLevel,
    GlobalFeatures, MoodInfo, TimeSeriesPoint, TrackMetadata, RECORD_VERSION,
};
use crate::fingerprint::Fingerprint;
use crate::harmony::HarmonyModel;
use crate::mood::Mood;
use crate::tasks::TaskState;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

impl Database {
    /// True iff both a track row and its features row exist.
    pub fn is_cached(&self, file_path: &str) -> bool {
        self.conn
            .query_row(
                "SELECT t.id FROM tracks t
                 JOIN global_features gf ON gf.track_id = t.id
                 WHERE t.file_path = ?1",
                params![file_path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .ok()
            .flatten()
            .is_some()
    }

    /// Stored (file_size, mtime_secs) for fingerprint freshness checks.
    pub fn cached_identity(&self, file_path: &str) -> Result<Option<(u64, i64)>> {
        let row = self
            .conn
            .query_row(
                "SELECT t.file_size, t.mtime_secs FROM tracks t
                 JOIN global_features gf ON gf.track_id = t.id
                 WHERE t.file_path = ?1",
                params![file_path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Register a file during a scan: insert or refresh the track row
    /// without touching features. Returns the track id.
    pub fn register_track(
        &self,
        path: &std::path::Path,
        tags: &crate::scanner::metadata::TagInfo,
        fingerprint: &Fingerprint,
    ) -> Result<i64> {
        let file_path = path.to_string_lossy().to_string();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.conn.execute(
            "INSERT INTO tracks (
                file_path, filename, title, artist, album, genre, year,
                duration, file_size, extension, fingerprint, mtime_secs, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, strftime('%s','now')
            )
            ON CONFLICT(file_path) DO UPDATE SET
                filename = excluded.filename,
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                genre = excluded.genre,
                year = excluded.year,
                duration = excluded.duration,
                file_size = excluded.file_size,
                extension = excluded.extension,
                fingerprint = excluded.fingerprint,
                mtime_secs = excluded.mtime_secs,
                updated_at = strftime('%s','now')
            ",
            params![
                file_path,
                filename,
                tags.title,
                tags.artist,
                tags.album,
                tags.genre,
                tags.year,
                tags.duration_secs.unwrap_or(0.0),
                fingerprint.file_size as i64,
                extension,
                fingerprint.digest,
                fingerprint.mtime_secs,
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM tracks WHERE file_path = ?1",
            params![file_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Atomic upsert of a full analysis record: insert-or-update the track,
    /// replace its features row, and replace its time series, all in one
    /// transaction. Range coercion is best-effort and logged; only I/O and
    /// schema failures surface as errors.
    pub fn save(&self, analysis: &Analysis, fingerprint: &Fingerprint) -> Result<bool> {
        let (features, coercions) = analysis.features.sanitized();
        for note in &coercions {
            log::warn!("{}: {note}", analysis.file_path);
        }

        let mood_scores_json = serde_json::to_string(&analysis.mood.scores).ok();

        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO tracks (
                file_path, filename, title, artist, album, genre, year,
                duration, file_size, extension, fingerprint, mtime_secs, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, strftime('%s','now')
            )
            ON CONFLICT(file_path) DO UPDATE SET
                filename = excluded.filename,
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                genre = excluded.genre,
                year = excluded.year,
                duration = excluded.duration,
                file_size = excluded.file_size,
                extension = excluded.extension,
                fingerprint = excluded.fingerprint,
                mtime_secs = excluded.mtime_secs,
                updated_at = strftime('%s','now')
            ",
            params![
                analysis.file_path,
                analysis.filename,
                analysis.metadata.title,
                analysis.metadata.artist,
                analysis.metadata.album,
                analysis.metadata.genre,
                analysis.metadata.year,
                sanitize_real(analysis.metadata.duration, 0.0),
                analysis.metadata.file_size as i64,
                analysis.metadata.extension,
                fingerprint.digest,
                fingerprint.mtime_secs,
            ],
        )?;

        let track_id: i64 = tx.query_row(
            "SELECT id FROM tracks WHERE file_path = ?1",
            params![analysis.file_path],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT OR REPLACE INTO global_features (
                track_id, bpm, key_name, camelot, key_confidence,
                energy, valence, danceability, loudness, spectral_centroid,
                zero_crossing_rate, mfcc_variance, primary_mood, mood_confidence,
                mood_scores, energy_level, bpm_category, analyzed_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, strftime('%s','now')
            )",
            params![
                track_id,
                features.bpm,
                analysis.camelot.key,
                analysis.camelot.camelot.to_string(),
                sanitize_real(analysis.camelot.key_confidence, 0.0).clamp(0.0, 1.0),
                features.energy,
                features.valence,
                features.danceability,
                features.loudness,
                features.spectral_centroid,
                features.zero_crossing_rate,
                features.mfcc_variance,
                analysis.mood.primary_mood.as_str(),
                sanitize_real(analysis.mood.confidence, 0.0).clamp(0.0, 1.0),
                mood_scores_json,
                analysis.derived_metrics.energy_level.as_str(),
                analysis.derived_metrics.bpm_category.as_str(),
            ],
        )?;

        // Replace the time series atomically: all-old or all-new, never a mix
        tx.execute(
            "DELETE FROM time_series_features WHERE track_id = ?1",
            params![track_id],
        )?;
        if !analysis.time_series_features.is_empty() {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO time_series_features (
                    track_id, timestamp, energy_value, brightness_value,
                    spectral_rolloff, rms_energy
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for point in &analysis.time_series_features {
                stmt.execute(params![
                    track_id,
                    sanitize_real(point.timestamp, 0.0),
                    sanitize_real(point.energy_value, 0.0),
                    sanitize_real(point.brightness_value, 0.0),
                    sanitize_real(point.spectral_rolloff, 0.0),
                    sanitize_real(point.rms_energy, 0.0),
                ])?;
            }
        }

        tx.commit()?;
        Ok(true)
    }

    /// Load a cached analysis, joining track + features and attaching the
    /// time series. Returns None when the file is not cached. Missing
    /// numeric fields resolve to safe defaults.
    pub fn load(&self, file_path: &str) -> Result<Option<Analysis>> {
        let row = self
            .conn
            .query_row(
                "SELECT t.id, t.file_path, t.filename, t.title, t.artist, t.album,
                        t.genre, t.year, t.duration, t.file_size, t.extension,
                        gf.bpm, gf.key_name, gf.camelot, gf.key_confidence,
                        gf.energy, gf.valence, gf.danceability, gf.loudness,
                        gf.spectral_centroid, gf.zero_crossing_rate, gf.mfcc_variance,
                        gf.primary_mood, gf.mood_confidence, gf.mood_scores,
                        gf.energy_level, gf.bpm_category, gf.analyzed_at
                 FROM tracks t
                 JOIN global_features gf ON gf.track_id = t.id
                 WHERE t.file_path = ?1",
                params![file_path],
                |row| {
                    Ok(RawLoadedRow {
                        track_id: row.get(0)?,
                        file_path: row.get(1)?,
                        filename: row.get(2)?,
                        title: row.get(3)?,
                        artist: row.get(4)?,
                        album: row.get(5)?,
                        genre: row.get(6)?,
                        year: row.get(7)?,
                        duration: row.get(8)?,
                        file_size: row.get(9)?,
                        extension: row.get(10)?,
                        bpm: row.get(11)?,
                        key_name: row.get(12)?,
                        camelot: row.get(13)?,
                        key_confidence: row.get(14)?,
                        energy: row.get(15)?,
                        valence: row.get(16)?,
                        danceability: row.get(17)?,
                        loudness: row.get(18)?,
                        spectral_centroid: row.get(19)?,
                        zero_crossing_rate: row.get(20)?,
                        mfcc_variance: row.get(21)?,
                        primary_mood: row.get(22)?,
                        mood_confidence: row.get(23)?,
                        mood_scores: row.get(24)?,
                        energy_level: row.get(25)?,
                        bpm_category: row.get(26)?,
                        analyzed_at: row.get(27)?,
                    })
                },
            )
            .optional()?;

        let raw = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let time_series = self.load_time_series(raw.track_id)?;
        Ok(Some(raw.into_analysis(time_series)))
    }

    fn load_time_series(&self, track_id: i64) -> Result<Vec<TimeSeriesPoint>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, energy_value, brightness_value, spectral_rolloff, rms_energy
             FROM time_series_features
             WHERE track_id = ?1
             ORDER BY timestamp",
        )?;
        let points = stmt
            .query_map(params![track_id], |row| {
                Ok(TimeSeriesPoint {
                    timestamp: row.get::<_, Option<f64>>(0)?.unwrap_or(0.0),
                    energy_value: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    brightness_value: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    spectral_rolloff: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    rms_energy: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    zero_crossing_rate: None,
                    spectral_bandwidth: None,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Filtered, sorted library listing.
    pub fn list(
        &self,
        filter: &TrackFilter,
        sort: SortKey,
        dir: SortDir,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TrackSummary>> {
        let mut sql = String::from(
            "SELECT t.id, t.file_path, t.filename, t.title, t.artist, t.duration,
                    gf.bpm, gf.key_name, gf.camelot, gf.energy, gf.primary_mood, gf.analyzed_at
             FROM tracks t
             LEFT JOIN global_features gf ON gf.track_id = t.id",
        );

        let mut clauses: Vec<String> = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(artist) = &filter.artist {
            params_vec.push(Box::new(format!("%{artist}%")));
            clauses.push(format!("t.artist LIKE ?{}", params_vec.len()));
        }
        if let Some(genre) = &filter.genre {
            params_vec.push(Box::new(format!("%{genre}%")));
            clauses.push(format!("t.genre LIKE ?{}", params_vec.len()));
        }
        if let Some(min_bpm) = filter.min_bpm {
            params_vec.push(Box::new(min_bpm));
            clauses.push(format!("gf.bpm >= ?{}", params_vec.len()));
        }
        if let Some(max_bpm) = filter.max_bpm {
            params_vec.push(Box::new(max_bpm));
            clauses.push(format!("gf.bpm <= ?{}", params_vec.len()));
        }
        if let Some(min_energy) = filter.min_energy {
            params_vec.push(Box::new(min_energy));
            clauses.push(format!("gf.energy >= ?{}", params_vec.len()));
        }
        if let Some(max_energy) = filter.max_energy {
            params_vec.push(Box::new(max_energy));
            clauses.push(format!("gf.energy <= ?{}", params_vec.len()));
        }
        if let Some(mood) = &filter.mood {
            params_vec.push(Box::new(mood.clone()));
            clauses.push(format!("gf.primary_mood = ?{}", params_vec.len()));
        }
        if let Some(search) = &filter.search {
            params_vec.push(Box::new(format!("%{search}%")));
            let n = params_vec.len();
            clauses.push(format!(
                "(t.title LIKE ?{n} OR t.artist LIKE ?{n} OR t.filename LIKE ?{n})"
            ));
        }

        if !clauses.is_empty() {
            sql += " WHERE ";
            sql += &clauses.join(" AND ");
        }

        sql += &format!(
            " ORDER BY {} {}, t.file_path ASC LIMIT {} OFFSET {}",
            sort.column(),
            dir.keyword(),
            limit,
            offset
        );

        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok(TrackSummary {
                    track_id: row.get(0)?,
                    file_path: row.get(1)?,
                    filename: row.get(2)?,
                    title: row.get(3)?,
                    artist: row.get(4)?,
                    duration: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                    bpm: row.get(6)?,
                    key: row.get(7)?,
                    camelot: row.get(8)?,
                    energy: row.get(9)?,
                    mood: row.get(10)?,
                    analyzed_at: row.get(11)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let total_tracks: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        let analyzed_tracks: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM global_features",
            [],
            |row| row.get(0),
        )?;
        let (oldest_at, newest_at): (Option<f64>, Option<f64>) = self.conn.query_row(
            "SELECT MIN(analyzed_at), MAX(analyzed_at) FROM global_features",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(LibraryStats {
            total_tracks,
            analyzed_tracks,
            total_size_bytes: self.file_size_bytes(),
            oldest_at,
            newest_at,
        })
    }

    /// Remove analyzed tracks older than the age cutoff, then vacuum.
    /// `max_size_bytes` is advisory: exceeding it after the purge is logged.
    pub fn cleanup(&self, max_age_days: u32, max_size_bytes: u64) -> Result<CleanupReport> {
        let cutoff = chrono::Utc::now().timestamp() as f64 - max_age_days as f64 * 86_400.0;

        let removed = self.conn.execute(
            "DELETE FROM tracks WHERE id IN (
                SELECT t.id FROM tracks t
                JOIN global_features gf ON gf.track_id = t.id
                WHERE gf.analyzed_at < ?1
            )",
            params![cutoff],
        )?;

        // VACUUM must run outside any transaction
        self.conn.execute_batch("VACUUM")?;

        let current_size_bytes = self.file_size_bytes();
        if current_size_bytes > max_size_bytes {
            log::warn!(
                "store is {current_size_bytes} bytes after cleanup, above the {max_size_bytes} byte target"
            );
        }

        Ok(CleanupReport {
            removed_tracks: removed,
            current_size_bytes,
        })
    }

    /// Truncate all tables. Returns the number of tracks removed.
    pub fn clear(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;

        // Cascades take features and time series with the tracks
        self.conn.execute("DELETE FROM tracks", [])?;
        self.conn.execute("DELETE FROM analysis_tasks", [])?;
        self.conn.execute_batch("VACUUM")?;

        Ok(count as usize)
    }

    /// Persist a task snapshot so job history survives the in-memory
    /// registry's TTL.
    pub fn record_task(&self, state: &TaskState) -> Result<()> {
        let completed_at = state
            .status
            .is_terminal()
            .then(|| chrono::Utc::now().timestamp() as f64);
        self.conn.execute(
            "INSERT INTO analysis_tasks (
                id, status, progress, message, started_at, completed_at,
                error_message, total_files, processed_files
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message,
                total_files = excluded.total_files,
                processed_files = excluded.processed_files",
            params![
                state.task_id,
                state.status.as_str(),
                state.progress,
                state.current_file,
                state.started_at as f64,
                completed_at,
                state.errors.last(),
                state.total as i64,
                state.processed as i64,
            ],
        )?;
        Ok(())
    }
}

fn sanitize_real(v: f64, default: f64) -> f64 {
    if v.is_finite() { v } else { default }
}

/// Flat row pulled by `load`, turned back into the wire record in one place.
struct RawLoadedRow {
    track_id: i64,
    file_path: String,
    filename: String,
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    genre: Option<String>,
    year: Option<String>,
    duration: Option<f64>,
    file_size: Option<i64>,
    extension: Option<String>,
    bpm: Option<f64>,
    key_name: Option<String>,
    camelot: Option<String>,
    key_confidence: Option<f64>,
    energy: Option<f64>,
    valence: Option<f64>,
    danceability: Option<f64>,
    loudness: Option<f64>,
    spectral_centroid: Option<f64>,
    zero_crossing_rate: Option<f64>,
    mfcc_variance: Option<f64>,
    primary_mood: Option<String>,
    mood_confidence: Option<f64>,
    mood_scores: Option<String>,
    energy_level: Option<String>,
    bpm_category: Option<String>,
    analyzed_at: Option<f64>,
}

impl RawLoadedRow {
    fn into_analysis(self, time_series: Vec<TimeSeriesPoint>) -> Analysis {
        let features = GlobalFeatures {
            bpm: self.bpm.unwrap_or(defaults::BPM),
            energy: self.energy.unwrap_or(defaults::ENERGY),
            valence: self.valence.unwrap_or(defaults::VALENCE),
            danceability: self.danceability.unwrap_or(defaults::DANCEABILITY),
            loudness: self.loudness.unwrap_or(defaults::LOUDNESS),
            spectral_centroid: self.spectral_centroid.unwrap_or(defaults::SPECTRAL_CENTROID),
            zero_crossing_rate: self.zero_crossing_rate.unwrap_or(defaults::ZERO_CROSSING_RATE),
            mfcc_variance: self.mfcc_variance.unwrap_or(defaults::MFCC_VARIANCE),
        };

        let harmony = HarmonyModel::new();
        let camelot_code = self
            .camelot
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or_else(|| defaults::CAMELOT.parse().expect("default camelot"));
        let camelot = CamelotInfo {
            key: self.key_name.unwrap_or_else(|| defaults::KEY.to_string()),
            camelot: camelot_code,
            key_confidence: self.key_confidence.unwrap_or(0.0),
            compatible_keys: harmony.compatible(camelot_code),
        };

        let primary_mood = self
            .primary_mood
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(Mood::Neutral);
        let scores: BTreeMap<Mood, f64> = self
            .mood_scores
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        let mood = MoodInfo {
            primary_mood,
            confidence: self.mood_confidence.unwrap_or(0.0),
            scores,
        };

        let derived = DerivedMetrics {
            energy_level: match self.energy_level.as_deref() {
                Some("low") => EnergyLevel::Low,
                Some("high") => EnergyLevel::High,
                Some("medium") => EnergyLevel::Medium,
                _ => EnergyLevel::from_energy(features.energy),
            },
            bpm_category: match self.bpm_category.as_deref() {
                Some("slow") => BpmCategory::Slow,
                Some("medium") => BpmCategory::Medium,
                Some("fast") => BpmCategory::Fast,
                Some("very_fast") => BpmCategory::VeryFast,
                _ => BpmCategory::from_bpm(features.bpm),
            },
            estimated_mood: crate::analyzer::record::EstimatedMood::from_quadrant(
                features.energy,
                features.valence,
            ),
            danceability_level: crate::analyzer::record::DanceabilityLevel::from_danceability(
                features.danceability,
            ),
        };

        Analysis {
            file_path: self.file_path.clone(),
            filename: self.filename,
            status: AnalysisStatus::Completed,
            features,
            metadata: TrackMetadata {
                title: self.title,
                artist: self.artist,
                album: self.album,
                genre: self.genre,
                year: self.year,
                duration: self.duration.unwrap_or(0.0),
                file_size: self.file_size.unwrap_or(0) as u64,
                extension: self.extension.unwrap_or_default(),
                analyzed_at: self.analyzed_at.unwrap_or(0.0),
            },
            camelot,
            mood,
            derived_metrics: derived,
            time_series_features: time_series,
            errors: Vec::new(),
            version: RECORD_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::record::EstimatedMood;
    use crate::tasks::{TaskDelta, TaskRegistry, TaskStatus};
    use std::path::Path;

    fn sample_analysis(path: &str, bpm: f64, energy: f64) -> Analysis {
        let harmony = HarmonyModel::new();
        let camelot = harmony.to_camelot("Am").unwrap();
        let features = GlobalFeatures {
            bpm,
            energy,
            valence: 0.6,
            danceability: 0.7,
            loudness: -8.0,
            spectral_centroid: 2500.0,
            zero_crossing_rate: 0.12,
            mfcc_variance: 0.8,
        };
        let derived = DerivedMetrics::from_features(&features);
        let mut scores: BTreeMap<Mood, f64> = BTreeMap::new();
        scores.insert(Mood::Driving, 0.8);
        scores.insert(Mood::Neutral, 0.2);

        Analysis {
            file_path: path.to_string(),
            filename: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            status: AnalysisStatus::Completed,
            features,
            metadata: TrackMetadata {
                title: Some("Test Track".into()),
                artist: Some("Test Artist".into()),
                album: None,
                genre: Some("Techno".into()),
                year: Some("2021".into()),
                duration: 300.0,
                file_size: 4096,
                extension: "mp3".into(),
                analyzed_at: 1_700_000_000.0,
            },
            camelot: CamelotInfo {
                key: "A Minor".into(),
                camelot,
                key_confidence: 0.9,
                compatible_keys: harmony.compatible(camelot),
            },
            mood: MoodInfo {
                primary_mood: Mood::Driving,
                confidence: 0.8,
                scores,
            },
            derived_metrics: derived,
            time_series_features: vec![
                TimeSeriesPoint {
                    timestamp: 0.0,
                    energy_value: 0.5,
                    brightness_value: 2000.0,
                    spectral_rolloff: 4000.0,
                    rms_energy: 0.5,
                    zero_crossing_rate: None,
                    spectral_bandwidth: None,
                },
                TimeSeriesPoint {
                    timestamp: 5.0,
                    energy_value: 0.6,
                    brightness_value: 2100.0,
                    spectral_rolloff: 4100.0,
                    rms_energy: 0.6,
                    zero_crossing_rate: None,
                    spectral_bandwidth: None,
                },
            ],
            errors: Vec::new(),
            version: RECORD_VERSION.to_string(),
        }
    }

    fn fp(path: &str) -> Fingerprint {
        Fingerprint::from_parts(Path::new(path), 4096, 1_700_000_000)
    }

    #[test]
    fn test_save_then_cached_and_load() {
        let db = Database::open_in_memory().unwrap();
        let path = "/music/a.mp3";
        assert!(!db.is_cached(path));

        let a = sample_analysis(path, 128.0, 0.8);
        assert!(db.save(&a, &fp(path)).unwrap());
        assert!(db.is_cached(path));

        let loaded = db.load(path).unwrap().unwrap();
        assert_eq!(loaded.features.bpm, 128.0);
        assert!((60.0..=200.0).contains(&loaded.features.bpm));
        assert_eq!(loaded.camelot.camelot.to_string(), "8A");
        assert_eq!(loaded.mood.primary_mood, Mood::Driving);
        assert_eq!(loaded.mood.scores[&Mood::Driving], 0.8);
        assert_eq!(loaded.metadata.title.as_deref(), Some("Test Track"));
        assert_eq!(loaded.time_series_features.len(), 2);
        assert_eq!(loaded.status, AnalysisStatus::Completed);

        assert!(db.load("/music/missing.mp3").unwrap().is_none());
    }

    #[test]
    fn test_save_is_content_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let path = "/music/a.mp3";
        let a = sample_analysis(path, 128.0, 0.8);

        db.save(&a, &fp(path)).unwrap();
        let first = db.load(path).unwrap().unwrap();
        db.save(&first, &fp(path)).unwrap();
        let second = db.load(path).unwrap().unwrap();

        assert_eq!(first.features, second.features);
        assert_eq!(first.camelot, second.camelot);
        assert_eq!(first.time_series_features, second.time_series_features);

        // Still exactly one track and one features row
        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.analyzed_tracks, 1);
    }

    #[test]
    fn test_out_of_range_values_clamped_on_write() {
        let db = Database::open_in_memory().unwrap();
        let path = "/music/weird.mp3";
        let mut a = sample_analysis(path, -5.0, 3.0);
        a.features.loudness = 12.0;
        a.features.spectral_centroid = f64::NAN;

        assert!(db.save(&a, &fp(path)).unwrap());
        let loaded = db.load(path).unwrap().unwrap();
        assert_eq!(loaded.features.bpm, 120.0);
        assert_eq!(loaded.features.energy, 1.0);
        assert_eq!(loaded.features.loudness, 0.0);
        assert_eq!(loaded.features.spectral_centroid, 2000.0);
    }

    #[test]
    fn test_time_series_replacement_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let path = "/music/a.mp3";
        let mut a = sample_analysis(path, 128.0, 0.8);
        db.save(&a, &fp(path)).unwrap();
        assert_eq!(db.load(path).unwrap().unwrap().time_series_features.len(), 2);

        // New save with a different cardinality fully replaces the series
        a.time_series_features = (0..5)
            .map(|i| TimeSeriesPoint {
                timestamp: i as f64 * 5.0,
                energy_value: 0.1 * i as f64,
                brightness_value: 1000.0,
                spectral_rolloff: 3000.0,
                rms_energy: 0.1 * i as f64,
                zero_crossing_rate: None,
                spectral_bandwidth: None,
            })
            .collect();
        db.save(&a, &fp(path)).unwrap();
        let loaded = db.load(path).unwrap().unwrap();
        assert_eq!(loaded.time_series_features.len(), 5);
        // Ordered by timestamp
        for pair in loaded.time_series_features.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }

        // Saving with an empty series clears it
        a.time_series_features.clear();
        db.save(&a, &fp(path)).unwrap();
        assert!(db.load(path).unwrap().unwrap().time_series_features.is_empty());
    }

    #[test]
    fn test_list_filters_and_sort() {
        let db = Database::open_in_memory().unwrap();
        let specs = [
            ("/m/slow.mp3", 80.0, 0.2, "Alice"),
            ("/m/mid.mp3", 120.0, 0.5, "Bob"),
            ("/m/fast.mp3", 160.0, 0.9, "Alice"),
        ];
        for (path, bpm, energy, artist) in specs {
            let mut a = sample_analysis(path, bpm, energy);
            a.metadata.artist = Some(artist.to_string());
            db.save(&a, &fp(path)).unwrap();
        }

        let all = db
            .list(&TrackFilter::default(), SortKey::Bpm, SortDir::Asc, 100, 0)
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].file_path, "/m/slow.mp3");
        assert_eq!(all[2].file_path, "/m/fast.mp3");

        let desc = db
            .list(&TrackFilter::default(), SortKey::Bpm, SortDir::Desc, 100, 0)
            .unwrap();
        assert_eq!(desc[0].file_path, "/m/fast.mp3");

        let alice = db
            .list(
                &TrackFilter { artist: Some("Ali".into()), ..Default::default() },
                SortKey::Filename,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert_eq!(alice.len(), 2);

        let bpm_range = db
            .list(
                &TrackFilter { min_bpm: Some(100.0), max_bpm: Some(130.0), ..Default::default() },
                SortKey::Bpm,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert_eq!(bpm_range.len(), 1);
        assert_eq!(bpm_range[0].file_path, "/m/mid.mp3");

        let energetic = db
            .list(
                &TrackFilter { min_energy: Some(0.8), ..Default::default() },
                SortKey::Energy,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert_eq!(energetic.len(), 1);

        let search = db
            .list(
                &TrackFilter { search: Some("fast".into()), ..Default::default() },
                SortKey::Filename,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert_eq!(search.len(), 1);

        let paged = db
            .list(&TrackFilter::default(), SortKey::Bpm, SortDir::Asc, 2, 1)
            .unwrap();
        assert_eq!(paged.len(), 2);
        assert_eq!(paged[0].file_path, "/m/mid.mp3");
    }

    #[test]
    fn test_list_filter_by_mood() {
        let db = Database::open_in_memory().unwrap();
        let a = sample_analysis("/m/a.mp3", 128.0, 0.8);
        db.save(&a, &fp("/m/a.mp3")).unwrap();

        let driving = db
            .list(
                &TrackFilter { mood: Some("driving".into()), ..Default::default() },
                SortKey::Filename,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert_eq!(driving.len(), 1);
        assert_eq!(driving[0].mood.as_deref(), Some("driving"));

        let chill = db
            .list(
                &TrackFilter { mood: Some("chill".into()), ..Default::default() },
                SortKey::Filename,
                SortDir::Asc,
                100,
                0,
            )
            .unwrap();
        assert!(chill.is_empty());
    }

    #[test]
    fn test_stats_and_clear() {
        let db = Database::open_in_memory().unwrap();
        let empty = db.stats().unwrap();
        assert_eq!(empty.total_tracks, 0);
        assert_eq!(empty.analyzed_tracks, 0);
        assert!(empty.oldest_at.is_none());

        for path in ["/m/a.mp3", "/m/b.mp3"] {
            db.save(&sample_analysis(path, 120.0, 0.5), &fp(path)).unwrap();
        }
        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 2);
        assert_eq!(stats.analyzed_tracks, 2);
        assert!(stats.oldest_at.is_some());

        assert_eq!(db.clear().unwrap(), 2);
        let after = db.stats().unwrap();
        assert_eq!(after.total_tracks, 0);
        assert_eq!(after.analyzed_tracks, 0);
        // Cascade removed the time series too
        let orphans: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM time_series_features", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_cleanup_removes_old_tracks() {
        let db = Database::open_in_memory().unwrap();
        for path in ["/m/old.mp3", "/m/new.mp3"] {
            db.save(&sample_analysis(path, 120.0, 0.5), &fp(path)).unwrap();
        }
        // Age one row far into the past
        db.conn
            .execute(
                "UPDATE global_features SET analyzed_at = 1000.0
                 WHERE track_id = (SELECT id FROM tracks WHERE file_path = '/m/old.mp3')",
                [],
            )
            .unwrap();

        let report = db.cleanup(30, u64::MAX).unwrap();
        assert_eq!(report.removed_tracks, 1);
        assert!(!db.is_cached("/m/old.mp3"));
        assert!(db.is_cached("/m/new.mp3"));
    }

    #[test]
    fn test_cached_identity_matches_fingerprint() {
        let db = Database::open_in_memory().unwrap();
        let path = "/m/a.mp3";
        assert!(db.cached_identity(path).unwrap().is_none());

        db.save(&sample_analysis(path, 120.0, 0.5), &fp(path)).unwrap();
        let (size, mtime) = db.cached_identity(path).unwrap().unwrap();
        assert_eq!(size, 4096);
        assert_eq!(mtime, 1_700_000_000);

        let current = Fingerprint::from_parts(Path::new(path), 4096, 1_700_000_001);
        assert!(current.matches(size, mtime));
        let drifted = Fingerprint::from_parts(Path::new(path), 4096, 1_700_000_100);
        assert!(!drifted.matches(size, mtime));
    }

    #[test]
    fn test_record_task_rows() {
        let db = Database::open_in_memory().unwrap();
        let registry = TaskRegistry::new();
        let id = registry.create(10);
        let state = registry.get(&id).unwrap();
        db.record_task(&state).unwrap();

        registry.update(&id, TaskDelta {
            status: Some(TaskStatus::Completed),
            processed: Some(10),
            ..Default::default()
        });
        db.record_task(&registry.get(&id).unwrap()).unwrap();

        let (status, processed): (String, i64) = db
            .conn
            .query_row(
                "SELECT status, processed_files FROM analysis_tasks WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "completed");
        assert_eq!(processed, 10);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_track_without_features() {
        let db = Database::open_in_memory().unwrap();
        let path = Path::new("/m/scanned.mp3");
        let tags = crate::scanner::metadata::TagInfo {
            title: Some("Scanned".into()),
            artist: Some("Someone".into()),
            duration_secs: Some(211.0),
            ..Default::default()
        };
        let id = db.register_track(path, &tags, &fp("/m/scanned.mp3")).unwrap();
        assert!(id > 0);

        // Registered but not analyzed: visible in listings, not cached
        assert!(!db.is_cached("/m/scanned.mp3"));
        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.analyzed_tracks, 0);

        let listed = db
            .list(&TrackFilter::default(), SortKey::Filename, SortDir::Asc, 10, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].bpm.is_none());

        // Re-registering updates in place
        let id2 = db.register_track(path, &tags, &fp("/m/scanned.mp3")).unwrap();
        assert_eq!(id, id2);
        assert_eq!(db.stats().unwrap().total_tracks, 1);

        // A later save attaches features to the same row
        db.save(&sample_analysis("/m/scanned.mp3", 122.0, 0.5), &fp("/m/scanned.mp3"))
            .unwrap();
        assert!(db.is_cached("/m/scanned.mp3"));
        assert_eq!(db.stats().unwrap().analyzed_tracks, 1);
    }

    #[test]
    fn test_estimated_mood_recomputed_on_load() {
        let db = Database::open_in_memory().unwrap();
        let path = "/m/a.mp3";
        db.save(&sample_analysis(path, 128.0, 0.8), &fp(path)).unwrap();
        let loaded = db.load(path).unwrap().unwrap();
        // energy 0.8, valence 0.6 -> energetic quadrant
        assert_eq!(loaded.derived_metrics.estimated_mood, EstimatedMood::Energetic);
    }
}

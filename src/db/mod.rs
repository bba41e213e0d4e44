pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A store handle. One handle per task; a handle may be re-entered within
/// its owning task but must not be shared across tasks — workers return
/// plain values and the orchestrator performs all writes.
pub struct Database {
    pub conn: Connection,
    /// On-disk location, None for in-memory stores.
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: None };
        db.init()?;
        Ok(db)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn init(&self) -> Result<()> {
        // WAL keeps readers unblocked behind the single writer
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: tracks ⊕ global_features ⊕ time_series_features ⊕ analysis_tasks
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path       TEXT NOT NULL UNIQUE,
                filename        TEXT NOT NULL,
                title           TEXT,
                artist          TEXT,
                album           TEXT,
                genre           TEXT,
                year            TEXT,
                duration        REAL NOT NULL,
                file_size       INTEGER NOT NULL,
                extension       TEXT NOT NULL,

                -- Cache identity
                fingerprint     TEXT,
                mtime_secs      INTEGER,

                created_at      REAL NOT NULL DEFAULT (strftime('%s','now')),
                updated_at      REAL NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_file_path ON tracks(file_path);
            CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist);
            CREATE INDEX IF NOT EXISTS idx_tracks_genre ON tracks(genre);

            CREATE TABLE IF NOT EXISTS global_features (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id            INTEGER NOT NULL UNIQUE REFERENCES tracks(id) ON DELETE CASCADE,

                bpm                 REAL NOT NULL,
                key_name            TEXT,
                camelot             TEXT,
                key_confidence      REAL,
                energy              REAL NOT NULL,
                valence             REAL NOT NULL,
                danceability        REAL NOT NULL,
                loudness            REAL,
                spectral_centroid   REAL,
                zero_crossing_rate  REAL,
                mfcc_variance       REAL,
                primary_mood        TEXT,
                mood_confidence     REAL,
                mood_scores         TEXT, -- JSON mood -> score
                energy_level        TEXT,
                bpm_category        TEXT,
                analyzed_at         REAL NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_features_track ON global_features(track_id);
            CREATE INDEX IF NOT EXISTS idx_features_bpm ON global_features(bpm);
            CREATE INDEX IF NOT EXISTS idx_features_energy ON global_features(energy);
            CREATE INDEX IF NOT EXISTS idx_features_mood ON global_features(primary_mood);

            CREATE TABLE IF NOT EXISTS time_series_features (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id        INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                timestamp       REAL NOT NULL,
                energy_value    REAL,
                brightness_value REAL,
                spectral_rolloff REAL,
                rms_energy      REAL,
                created_at      REAL NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_time_series_track
                ON time_series_features(track_id, timestamp);

            CREATE TABLE IF NOT EXISTS analysis_tasks (
                id              TEXT PRIMARY KEY,
                status          TEXT NOT NULL DEFAULT 'pending',
                progress        REAL DEFAULT 0,
                message         TEXT,
                started_at      REAL,
                completed_at    REAL,
                error_message   TEXT,
                total_files     INTEGER DEFAULT 0,
                processed_files INTEGER DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON analysis_tasks(status);
            ",
        )?;
        Ok(())
    }
}

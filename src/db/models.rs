use serde::Serialize;

/// One row of a library listing.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub track_id: i64,
    pub file_path: String,
    pub filename: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration: f64,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub camelot: Option<String>,
    pub energy: Option<f64>,
    pub mood: Option<String>,
    pub analyzed_at: Option<f64>,
}

/// Filters for `Database::list`. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    /// Substring on artist.
    pub artist: Option<String>,
    /// Substring on genre.
    pub genre: Option<String>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    /// Exact primary mood.
    pub mood: Option<String>,
    /// Free text over title, artist, and filename.
    pub search: Option<String>,
}

/// Sort keys for `Database::list`, mapped to fixed columns (never
/// interpolated from caller strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Filename,
    Title,
    Artist,
    Bpm,
    Energy,
    Key,
    Duration,
    AnalyzedAt,
}

impl SortKey {
    pub(crate) fn column(self) -> &'static str {
        match self {
            SortKey::Filename => "t.filename",
            SortKey::Title => "t.title",
            SortKey::Artist => "t.artist",
            SortKey::Bpm => "gf.bpm",
            SortKey::Energy => "gf.energy",
            SortKey::Key => "gf.camelot",
            SortKey::Duration => "t.duration",
            SortKey::AnalyzedAt => "gf.analyzed_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Library statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryStats {
    pub total_tracks: i64,
    pub analyzed_tracks: i64,
    pub total_size_bytes: u64,
    pub oldest_at: Option<f64>,
    pub newest_at: Option<f64>,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub removed_tracks: usize,
    pub current_size_bytes: u64,
}

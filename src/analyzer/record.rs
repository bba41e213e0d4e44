use crate::harmony::{CamelotCode, HarmonyModel};
use crate::mood::{Mood, MoodResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Wire format version of the analysis record.
pub const RECORD_VERSION: &str = "2.0";

/// Safe defaults substituted for unknown or failed values. Fallback records
/// are built entirely from these.
pub mod defaults {
    pub const BPM: f64 = 120.0;
    pub const ENERGY: f64 = 0.5;
    pub const VALENCE: f64 = 0.5;
    pub const DANCEABILITY: f64 = 0.5;
    pub const LOUDNESS: f64 = -20.0;
    pub const SPECTRAL_CENTROID: f64 = 2000.0;
    pub const ZERO_CROSSING_RATE: f64 = 0.1;
    pub const MFCC_VARIANCE: f64 = 0.5;
    pub const KEY: &str = "Unknown";
    pub const CAMELOT: &str = "1A";
    pub const DURATION: f64 = 180.0;
}

/// Outcome of analyzing one file. `Fallback` means pre-validation failed;
/// `ErrorFallback` means the file loaded but extraction blew up later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    Fallback,
    Error,
    ErrorFallback,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Fallback => "fallback",
            AnalysisStatus::Error => "error",
            AnalysisStatus::ErrorFallback => "error_fallback",
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, AnalysisStatus::Fallback | AnalysisStatus::ErrorFallback)
    }
}

/// The global per-track feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalFeatures {
    pub bpm: f64,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub loudness: f64,
    pub spectral_centroid: f64,
    pub zero_crossing_rate: f64,
    pub mfcc_variance: f64,
}

impl Default for GlobalFeatures {
    fn default() -> Self {
        Self {
            bpm: defaults::BPM,
            energy: defaults::ENERGY,
            valence: defaults::VALENCE,
            danceability: defaults::DANCEABILITY,
            loudness: defaults::LOUDNESS,
            spectral_centroid: defaults::SPECTRAL_CENTROID,
            zero_crossing_rate: defaults::ZERO_CROSSING_RATE,
            mfcc_variance: defaults::MFCC_VARIANCE,
        }
    }
}

impl GlobalFeatures {
    /// Coerce every field into its documented range. Range violations are
    /// not fatal; each coercion is reported so callers can log it.
    pub fn sanitized(&self) -> (GlobalFeatures, Vec<String>) {
        let mut notes = Vec::new();
        let mut out = self.clone();

        if !out.bpm.is_finite() || out.bpm <= 0.0 {
            notes.push(format!("bpm {} coerced to {}", out.bpm, defaults::BPM));
            out.bpm = defaults::BPM;
        } else if !(60.0..=200.0).contains(&out.bpm) {
            let clamped = out.bpm.clamp(60.0, 200.0);
            notes.push(format!("bpm {} clamped to {clamped}", out.bpm));
            out.bpm = clamped;
        }

        for (name, value, default) in [
            ("energy", &mut out.energy, defaults::ENERGY),
            ("valence", &mut out.valence, defaults::VALENCE),
            ("danceability", &mut out.danceability, defaults::DANCEABILITY),
            ("zero_crossing_rate", &mut out.zero_crossing_rate, defaults::ZERO_CROSSING_RATE),
        ] {
            if !value.is_finite() {
                notes.push(format!("{name} non-finite, coerced to {default}"));
                *value = default;
            } else if !(0.0..=1.0).contains(value) {
                let clamped = value.clamp(0.0, 1.0);
                notes.push(format!("{name} {value} clamped to {clamped}"));
                *value = clamped;
            }
        }

        if !out.loudness.is_finite() {
            notes.push(format!("loudness non-finite, coerced to {}", defaults::LOUDNESS));
            out.loudness = defaults::LOUDNESS;
        } else if out.loudness > 0.0 || out.loudness < -60.0 {
            let clamped = out.loudness.clamp(-60.0, 0.0);
            notes.push(format!("loudness {} clamped to {clamped}", out.loudness));
            out.loudness = clamped;
        }

        if !out.spectral_centroid.is_finite() || out.spectral_centroid <= 0.0 {
            notes.push(format!(
                "spectral_centroid {} coerced to {}",
                out.spectral_centroid,
                defaults::SPECTRAL_CENTROID
            ));
            out.spectral_centroid = defaults::SPECTRAL_CENTROID;
        }

        if !out.mfcc_variance.is_finite() {
            notes.push(format!("mfcc_variance non-finite, coerced to {}", defaults::MFCC_VARIANCE));
            out.mfcc_variance = defaults::MFCC_VARIANCE;
        } else if out.mfcc_variance < 0.0 {
            notes.push(format!("mfcc_variance {} clamped to 0", out.mfcc_variance));
            out.mfcc_variance = 0.0;
        }

        (out, notes)
    }
}

/// Container metadata plus file facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    /// Seconds, computed from PCM length / sample rate when analyzed.
    pub duration: f64,
    pub file_size: u64,
    pub extension: String,
    /// Epoch seconds.
    pub analyzed_at: f64,
}

/// Tonal block of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamelotInfo {
    pub key: String,
    pub camelot: CamelotCode,
    pub key_confidence: f64,
    pub compatible_keys: Vec<CamelotCode>,
}

impl CamelotInfo {
    pub fn unknown() -> Self {
        let camelot: CamelotCode = defaults::CAMELOT.parse().expect("default camelot");
        Self {
            key: defaults::KEY.to_string(),
            camelot,
            key_confidence: 0.0,
            compatible_keys: HarmonyModel::new().compatible(camelot),
        }
    }
}

/// Mood block of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodInfo {
    pub primary_mood: Mood,
    pub confidence: f64,
    pub scores: BTreeMap<Mood, f64>,
}

impl MoodInfo {
    pub fn neutral() -> Self {
        let mut scores: BTreeMap<Mood, f64> = Mood::ALL.iter().map(|m| (*m, 0.0)).collect();
        scores.insert(Mood::Neutral, 1.0);
        Self {
            primary_mood: Mood::Neutral,
            confidence: 0.0,
            scores,
        }
    }
}

impl From<MoodResult> for MoodInfo {
    fn from(r: MoodResult) -> Self {
        Self {
            primary_mood: r.primary,
            confidence: r.confidence,
            scores: r.scores,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

impl EnergyLevel {
    pub fn from_energy(energy: f64) -> Self {
        if energy < 0.3 {
            EnergyLevel::Low
        } else if energy < 0.7 {
            EnergyLevel::Medium
        } else {
            EnergyLevel::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnergyLevel::Low => "low",
            EnergyLevel::Medium => "medium",
            EnergyLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmCategory {
    Slow,
    Medium,
    Fast,
    VeryFast,
}

impl BpmCategory {
    pub fn from_bpm(bpm: f64) -> Self {
        if bpm < 90.0 {
            BpmCategory::Slow
        } else if bpm < 120.0 {
            BpmCategory::Medium
        } else if bpm < 140.0 {
            BpmCategory::Fast
        } else {
            BpmCategory::VeryFast
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BpmCategory::Slow => "slow",
            BpmCategory::Medium => "medium",
            BpmCategory::Fast => "fast",
            BpmCategory::VeryFast => "very_fast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanceabilityLevel {
    Low,
    Medium,
    High,
}

impl DanceabilityLevel {
    pub fn from_danceability(d: f64) -> Self {
        if d > 0.7 {
            DanceabilityLevel::High
        } else if d > 0.4 {
            DanceabilityLevel::Medium
        } else {
            DanceabilityLevel::Low
        }
    }
}

/// Coarse mood estimate from the energy/valence quadrant, used by the
/// optimizer's mood-progression grouping. Distinct from the classifier's
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatedMood {
    Energetic,
    Happy,
    Calm,
    Melancholic,
    Aggressive,
    Uplifting,
    Neutral,
}

impl EstimatedMood {
    pub fn from_quadrant(energy: f64, valence: f64) -> Self {
        if energy > 0.7 && valence > 0.6 {
            EstimatedMood::Energetic
        } else if energy < 0.4 && valence > 0.6 {
            EstimatedMood::Happy
        } else if energy < 0.4 && valence < 0.4 {
            EstimatedMood::Melancholic
        } else if energy > 0.6 && valence < 0.4 {
            EstimatedMood::Aggressive
        } else {
            EstimatedMood::Neutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EstimatedMood::Energetic => "energetic",
            EstimatedMood::Happy => "happy",
            EstimatedMood::Calm => "calm",
            EstimatedMood::Melancholic => "melancholic",
            EstimatedMood::Aggressive => "aggressive",
            EstimatedMood::Uplifting => "uplifting",
            EstimatedMood::Neutral => "neutral",
        }
    }
}

/// Derived categorizations attached to every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub energy_level: EnergyLevel,
    pub bpm_category: BpmCategory,
    pub estimated_mood: EstimatedMood,
    pub danceability_level: DanceabilityLevel,
}

impl DerivedMetrics {
    pub fn from_features(f: &GlobalFeatures) -> Self {
        Self {
            energy_level: EnergyLevel::from_energy(f.energy),
            bpm_category: BpmCategory::from_bpm(f.bpm),
            estimated_mood: EstimatedMood::from_quadrant(f.energy, f.valence),
            danceability_level: DanceabilityLevel::from_danceability(f.danceability),
        }
    }

    pub fn neutral() -> Self {
        Self {
            energy_level: EnergyLevel::Medium,
            bpm_category: BpmCategory::Medium,
            estimated_mood: EstimatedMood::Neutral,
            danceability_level: DanceabilityLevel::Medium,
        }
    }
}

/// One non-overlapping window of the energy/brightness curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: f64,
    pub energy_value: f64,
    pub brightness_value: f64,
    pub spectral_rolloff: f64,
    pub rms_energy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_crossing_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_bandwidth: Option<f64>,
}

/// The complete per-track analysis record — the only shape that crosses
/// the store boundary or is serialized for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub file_path: String,
    pub filename: String,
    pub status: AnalysisStatus,
    pub features: GlobalFeatures,
    pub metadata: TrackMetadata,
    pub camelot: CamelotInfo,
    pub mood: MoodInfo,
    pub derived_metrics: DerivedMetrics,
    pub time_series_features: Vec<TimeSeriesPoint>,
    pub errors: Vec<String>,
    pub version: String,
}

impl Analysis {
    /// A well-formed record filled with safe defaults, for files that
    /// failed pre-validation.
    pub fn fallback(path: &Path, error: impl Into<String>) -> Self {
        Self::fallback_with_status(path, error, AnalysisStatus::Fallback)
    }

    /// Fallback for files that passed validation but failed during load
    /// or extraction.
    pub fn error_fallback(path: &Path, error: impl Into<String>) -> Self {
        Self::fallback_with_status(path, error, AnalysisStatus::ErrorFallback)
    }

    fn fallback_with_status(path: &Path, error: impl Into<String>, status: AnalysisStatus) -> Self {
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            file_path: path.to_string_lossy().to_string(),
            filename,
            status,
            features: GlobalFeatures::default(),
            metadata: TrackMetadata {
                duration: defaults::DURATION,
                file_size,
                extension,
                analyzed_at: chrono::Utc::now().timestamp() as f64,
                ..TrackMetadata::default()
            },
            camelot: CamelotInfo::unknown(),
            mood: MoodInfo::neutral(),
            derived_metrics: DerivedMetrics::neutral(),
            time_series_features: Vec::new(),
            errors: vec![error.into()],
            version: RECORD_VERSION.to_string(),
        }
    }
}

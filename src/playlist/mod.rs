pub mod preset;

use crate::analyzer::record::{Analysis, DerivedMetrics, EstimatedMood};
use crate::harmony::{CamelotCode, HarmonyModel};
use preset::{Algorithm, EnergyCurve, MoodFlow, Preset, PresetCatalog, Rule};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// A track may overshoot the duration target by this much and still be admitted.
const DURATION_TOLERANCE_SECS: f64 = 30.0;

/// Base hybrid scoring weights, re-balanced by rule boosts.
const HYBRID_AXES: [(&str, f64); 4] = [
    ("harmonic", 0.30),
    ("energy", 0.25),
    ("danceability", 0.25),
    ("valence", 0.20),
];

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("preset not found: {0:?}")]
    UnknownPreset(String),
    #[error("{0}")]
    Validation(String),
}

/// A rule that participated in sequencing, echoed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RuleApplied {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BpmStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistMetadata {
    pub total_tracks: usize,
    pub total_duration_seconds: f64,
    pub total_duration_minutes: f64,
    pub average_energy: f64,
    pub average_valence: f64,
    pub average_danceability: f64,
    pub bpm_stats: BpmStats,
    pub key_distribution: BTreeMap<String, usize>,
    pub mood_distribution: BTreeMap<String, usize>,
    pub energy_progression: Vec<f64>,
    pub preset_name: String,
    pub energy_curve: EnergyCurve,
    pub mood_flow: MoodFlow,
}

/// A playlist entry: the analysis record plus its position.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedTrack {
    #[serde(flatten)]
    pub analysis: Analysis,
    pub index: usize,
}

/// Ordered sequencing output. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub tracks: Vec<IndexedTrack>,
    pub metadata: PlaylistMetadata,
    pub preset_used: String,
    pub algorithm: Algorithm,
    pub rules_applied: Vec<RuleApplied>,
    pub created_at: String,
    pub status: String,
}

/// A track with normalized features and the handles the sequencers use.
#[derive(Debug, Clone)]
struct Prepared {
    analysis: Analysis,
    camelot: CamelotCode,
    bpm: f64,
    energy: f64,
    valence: f64,
    danceability: f64,
    duration: f64,
    mood: EstimatedMood,
}

/// Preset- and rule-driven sequencer. Stateless beyond its preset catalogue;
/// output order is a pure function of input set, preset, and rules.
pub struct PlaylistOptimizer {
    catalog: PresetCatalog,
    harmony: HarmonyModel,
}

impl PlaylistOptimizer {
    pub fn new(catalog: PresetCatalog, harmony: HarmonyModel) -> Self {
        Self { catalog, harmony }
    }

    pub fn with_defaults() -> Self {
        Self::new(PresetCatalog::builtin(), HarmonyModel::new())
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PresetCatalog {
        &mut self.catalog
    }

    pub fn create_playlist(
        &self,
        tracks: &[Analysis],
        preset_name: Option<&str>,
        custom_rules: Option<&[Rule]>,
        target_duration_min: Option<u32>,
    ) -> Result<Playlist, PlaylistError> {
        self.create_playlist_with_progress(tracks, preset_name, custom_rules, target_duration_min, &mut |_| {})
    }

    /// Full sequencing pipeline, reporting human-readable phase strings.
    pub fn create_playlist_with_progress(
        &self,
        tracks: &[Analysis],
        preset_name: Option<&str>,
        custom_rules: Option<&[Rule]>,
        target_duration_min: Option<u32>,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Playlist, PlaylistError> {
        progress("Initializing playlist generation...");

        if tracks.len() < 3 {
            return Err(PlaylistError::Validation(format!(
                "a playlist needs at least 3 tracks, got {}",
                tracks.len()
            )));
        }

        let preset = match preset_name {
            Some(name) => self
                .catalog
                .get(name)
                .ok_or_else(|| PlaylistError::UnknownPreset(name.to_string()))?,
            None => self.catalog.first_default(),
        };
        let rules: Vec<Rule> = match custom_rules {
            Some(r) => r.to_vec(),
            None => preset.rules.clone(),
        };
        let active: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();

        progress("Preparing tracks...");
        let prepared = prepare(tracks);
        if prepared.len() < 3 {
            return Err(PlaylistError::Validation(format!(
                "only {} tracks carry usable features, need at least 3",
                prepared.len()
            )));
        }

        progress(&format!("Applying {} algorithm...", preset.algorithm));
        let mut ordered = match preset.algorithm {
            Algorithm::Harmonic | Algorithm::KeyProgression => {
                self.sort_harmonic(prepared)
            }
            Algorithm::EnergyFlow => sort_energy_flow(prepared, &active),
            Algorithm::MoodProgression => sort_mood_progression(prepared, &active),
            Algorithm::BpmTransition => sort_bpm_transition(prepared, &active),
            Algorithm::HybridSmart => self.sort_hybrid(prepared, &active),
            Algorithm::Custom => sort_custom(prepared, &active),
        };

        progress("Optimizing playlist length...");
        if let Some(minutes) = target_duration_min.or(preset.target_duration_minutes) {
            ordered = trim_to_duration(ordered, minutes as f64 * 60.0);
        }

        progress("Computing playlist metadata...");
        let metadata = build_metadata(&ordered, preset);

        progress("Playlist generation complete");
        Ok(Playlist {
            tracks: ordered
                .into_iter()
                .enumerate()
                .map(|(index, p)| IndexedTrack { analysis: p.analysis, index })
                .collect(),
            metadata,
            preset_used: preset.name.clone(),
            algorithm: preset.algorithm,
            rules_applied: active
                .iter()
                .map(|r| RuleApplied { name: r.name.clone(), weight: r.weight })
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
            status: "completed".to_string(),
        })
    }

    /// Greedy nearest-neighbour chain over the Camelot wheel. The anchor is
    /// the track with the best average compatibility to all others; each
    /// successor maximizes the harmonic score, ties broken by smallest BPM
    /// difference (then the prepared base order).
    fn sort_harmonic(&self, tracks: Vec<Prepared>) -> Vec<Prepared> {
        if tracks.is_empty() {
            return tracks;
        }

        let mut anchor = 0;
        let mut best_avg = f64::NEG_INFINITY;
        for (i, track) in tracks.iter().enumerate() {
            let sum: f64 = tracks
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| self.harmony.score(track.camelot, other.camelot))
                .sum();
            let avg = sum / (tracks.len() - 1).max(1) as f64;
            if avg > best_avg {
                best_avg = avg;
                anchor = i;
            }
        }

        let mut remaining = tracks;
        let mut ordered = vec![remaining.remove(anchor)];
        while !remaining.is_empty() {
            let current = ordered.last().expect("chain is non-empty");
            let mut best = 0;
            let mut best_score = f64::NEG_INFINITY;
            let mut best_dbpm = f64::INFINITY;
            for (i, cand) in remaining.iter().enumerate() {
                let score = self.harmony.score(current.camelot, cand.camelot);
                let dbpm = (cand.bpm - current.bpm).abs();
                if score > best_score || (score == best_score && dbpm < best_dbpm) {
                    best = i;
                    best_score = score;
                    best_dbpm = dbpm;
                }
            }
            ordered.push(remaining.remove(best));
        }
        ordered
    }

    /// Weighted multi-axis scoring, sorted descending.
    fn sort_hybrid(&self, tracks: Vec<Prepared>, rules: &[&Rule]) -> Vec<Prepared> {
        let weights = hybrid_weights(rules);

        // The harmonic axis is each track's mean compatibility to the rest;
        // quadratic, so fanned out across the pool.
        let harmonic_means: Vec<f64> = (0..tracks.len())
            .into_par_iter()
            .map(|i| {
                let mut sum = 0.0;
                let mut n = 0usize;
                for (j, other) in tracks.iter().enumerate() {
                    if j != i {
                        sum += self.harmony.score(tracks[i].camelot, other.camelot);
                        n += 1;
                    }
                }
                if n == 0 { 0.5 } else { sum / n as f64 }
            })
            .collect();

        let mut scored: Vec<(usize, f64)> = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let total = weights["harmonic"] * harmonic_means[i]
                    + weights["energy"] * t.energy
                    + weights["danceability"] * t.danceability
                    + weights["valence"] * t.valence;
                (i, total)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut slots: Vec<Option<Prepared>> = tracks.into_iter().map(Some).collect();
        scored
            .into_iter()
            .map(|(i, _)| slots[i].take().expect("each index taken once"))
            .collect()
    }
}

/// Normalize features, recompute derived metrics, and establish the base
/// order every tie-break falls back to: ascending BPM, then file path.
fn prepare(tracks: &[Analysis]) -> Vec<Prepared> {
    let mut out: Vec<Prepared> = tracks
        .iter()
        .map(|a| {
            let mut analysis = a.clone();
            let (features, _) = analysis.features.sanitized();
            analysis.features = features;
            analysis.derived_metrics = DerivedMetrics::from_features(&analysis.features);
            let duration = if analysis.metadata.duration > 0.0 {
                analysis.metadata.duration
            } else {
                crate::analyzer::record::defaults::DURATION
            };
            Prepared {
                camelot: analysis.camelot.camelot,
                bpm: analysis.features.bpm,
                energy: analysis.features.energy,
                valence: analysis.features.valence,
                danceability: analysis.features.danceability,
                duration,
                mood: analysis.derived_metrics.estimated_mood,
                analysis,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        a.bpm
            .partial_cmp(&b.bpm)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.analysis.file_path.cmp(&b.analysis.file_path))
    });
    out
}

fn sort_energy_flow(mut tracks: Vec<Prepared>, rules: &[&Rule]) -> Vec<Prepared> {
    let ascending = rules
        .iter()
        .any(|r| r.name_contains("energy") && r.name_contains("progression"));
    if ascending {
        tracks.sort_by(|a, b| a.energy.partial_cmp(&b.energy).unwrap_or(Ordering::Equal));
        return tracks;
    }

    // Bucket low / mid / high, each ascending, concatenated low→high
    let mut low = Vec::new();
    let mut mid = Vec::new();
    let mut high = Vec::new();
    for t in tracks {
        if t.energy < 0.4 {
            low.push(t);
        } else if t.energy < 0.7 {
            mid.push(t);
        } else {
            high.push(t);
        }
    }
    for bucket in [&mut low, &mut mid, &mut high] {
        bucket.sort_by(|a, b| a.energy.partial_cmp(&b.energy).unwrap_or(Ordering::Equal));
    }
    low.extend(mid);
    low.extend(high);
    low
}

fn sort_mood_progression(tracks: Vec<Prepared>, rules: &[&Rule]) -> Vec<Prepared> {
    use EstimatedMood::*;

    let mut groups: BTreeMap<EstimatedMood, Vec<Prepared>> = BTreeMap::new();
    for t in tracks {
        groups.entry(t.mood).or_default().push(t);
    }

    let mut order: Vec<EstimatedMood> = vec![Calm, Happy, Energetic];
    if rules.iter().any(|r| r.name_contains("mood") && r.mentions("uplifting")) {
        order = vec![Melancholic, Calm, Happy, Uplifting, Energetic];
    } else if rules.iter().any(|r| r.name_contains("coherent")) {
        let mut dominant = None;
        let mut best_len = 0;
        for (mood, list) in &groups {
            if list.len() > best_len {
                best_len = list.len();
                dominant = Some(*mood);
            }
        }
        if let Some(d) = dominant {
            order = vec![d];
            order.extend(groups.keys().copied().filter(|m| *m != d));
        }
    }

    let mut out = Vec::new();
    for mood in &order {
        if let Some(list) = groups.remove(mood) {
            out.extend(list);
        }
    }
    // Whatever moods the order did not name come afterwards
    for (_, list) in groups {
        out.extend(list);
    }
    out
}

fn sort_bpm_transition(mut tracks: Vec<Prepared>, rules: &[&Rule]) -> Vec<Prepared> {
    tracks.sort_by(|a, b| a.bpm.partial_cmp(&b.bpm).unwrap_or(Ordering::Equal));

    if rules
        .iter()
        .any(|r| r.name_contains("gradual") && r.name_contains("increase"))
    {
        return tracks;
    }

    if rules.iter().any(|r| r.name_contains("stability")) {
        // 10-BPM strata, ascending; each stratum is already BPM-ordered
        let mut strata: BTreeMap<i64, Vec<Prepared>> = BTreeMap::new();
        for t in tracks {
            strata.entry((t.bpm / 10.0).floor() as i64).or_default().push(t);
        }
        return strata.into_values().flatten().collect();
    }

    // Seed at the median BPM, then greedily chain the nearest neighbour
    let seed = tracks.len() / 2;
    let mut remaining = tracks;
    let mut ordered = vec![remaining.remove(seed)];
    while !remaining.is_empty() {
        let current_bpm = ordered.last().expect("chain is non-empty").bpm;
        let mut best = 0;
        let mut best_delta = f64::INFINITY;
        for (i, cand) in remaining.iter().enumerate() {
            let delta = (cand.bpm - current_bpm).abs();
            if delta < best_delta {
                best_delta = delta;
                best = i;
            }
        }
        ordered.push(remaining.remove(best));
    }
    ordered
}

fn sort_custom(mut tracks: Vec<Prepared>, rules: &[&Rule]) -> Vec<Prepared> {
    for rule in rules {
        match rule.name.as_str() {
            "high_energy_filter" => {
                let min_energy = rule_param(rule, "min_energy").unwrap_or(0.7);
                tracks.retain(|t| t.energy >= min_energy);
            }
            "bpm_range_filter" => {
                let min_bpm = rule_param(rule, "min_bpm").unwrap_or(60.0);
                let max_bpm = rule_param(rule, "max_bpm").unwrap_or(200.0);
                tracks.retain(|t| (min_bpm..=max_bpm).contains(&t.bpm));
            }
            other => {
                log::debug!("custom rule {other:?} not recognized, skipping");
            }
        }
    }
    tracks
}

fn rule_param(rule: &Rule, key: &str) -> Option<f64> {
    rule.parameters.get(key).and_then(|v| v.as_f64())
}

/// Base weights plus +0.1 × rule.weight per mentioning rule, clamped to
/// [0, 1] before renormalizing to sum 1.
fn hybrid_weights(rules: &[&Rule]) -> BTreeMap<&'static str, f64> {
    let mut weights: BTreeMap<&'static str, f64> = HYBRID_AXES.into_iter().collect();
    for rule in rules {
        for (axis, _) in HYBRID_AXES {
            if rule.name_contains(axis) {
                *weights.get_mut(axis).expect("fixed axes") += rule.weight * 0.1;
            }
        }
    }
    for w in weights.values_mut() {
        *w = w.clamp(0.0, 1.0);
    }
    let sum: f64 = weights.values().sum();
    if sum > 0.0 {
        for w in weights.values_mut() {
            *w /= sum;
        }
    }
    weights
}

/// Accumulate tracks in order until the target is reached, admitting one
/// overshooting track inside the tolerance window.
fn trim_to_duration(tracks: Vec<Prepared>, target_secs: f64) -> Vec<Prepared> {
    let mut total = 0.0;
    let mut out = Vec::new();
    for t in tracks {
        if total + t.duration <= target_secs {
            total += t.duration;
            out.push(t);
        } else {
            if total + t.duration <= target_secs + DURATION_TOLERANCE_SECS {
                total += t.duration;
                out.push(t);
            }
            break;
        }
    }
    log::info!(
        "playlist trimmed to {} tracks ({:.1} min)",
        out.len(),
        total / 60.0
    );
    out
}

fn build_metadata(tracks: &[Prepared], preset: &Preset) -> PlaylistMetadata {
    let n = tracks.len();
    if n == 0 {
        return PlaylistMetadata {
            total_tracks: 0,
            total_duration_seconds: 0.0,
            total_duration_minutes: 0.0,
            average_energy: 0.0,
            average_valence: 0.0,
            average_danceability: 0.0,
            bpm_stats: BpmStats { min: 0.0, max: 0.0, avg: 0.0 },
            key_distribution: BTreeMap::new(),
            mood_distribution: BTreeMap::new(),
            energy_progression: Vec::new(),
            preset_name: preset.name.clone(),
            energy_curve: preset.energy_curve,
            mood_flow: preset.mood_flow,
        };
    }

    let total_duration: f64 = tracks.iter().map(|t| t.duration).sum();
    let avg = |f: fn(&Prepared) -> f64| tracks.iter().map(f).sum::<f64>() / n as f64;

    let mut min_bpm = f64::INFINITY;
    let mut max_bpm = f64::NEG_INFINITY;
    for t in tracks {
        min_bpm = min_bpm.min(t.bpm);
        max_bpm = max_bpm.max(t.bpm);
    }

    let mut key_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut mood_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for t in tracks {
        *key_distribution.entry(t.camelot.to_string()).or_insert(0) += 1;
        *mood_distribution.entry(t.mood.as_str().to_string()).or_insert(0) += 1;
    }

    PlaylistMetadata {
        total_tracks: n,
        total_duration_seconds: total_duration,
        total_duration_minutes: (total_duration / 60.0 * 10.0).round() / 10.0,
        average_energy: avg(|t| t.energy),
        average_valence: avg(|t| t.valence),
        average_danceability: avg(|t| t.danceability),
        bpm_stats: BpmStats {
            min: min_bpm,
            max: max_bpm,
            avg: avg(|t| t.bpm),
        },
        key_distribution,
        mood_distribution,
        energy_progression: tracks.iter().map(|t| t.energy).collect(),
        preset_name: preset.name.clone(),
        energy_curve: preset.energy_curve,
        mood_flow: preset.mood_flow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::record::{
        AnalysisStatus, CamelotInfo, GlobalFeatures, MoodInfo, TrackMetadata, RECORD_VERSION,
    };

    fn track(path: &str, key: &str, bpm: f64, energy: f64, valence: f64, dance: f64, duration: f64) -> Analysis {
        let harmony = HarmonyModel::new();
        let camelot = harmony.to_camelot(key).expect("test key");
        let features = GlobalFeatures {
            bpm,
            energy,
            valence,
            danceability: dance,
            loudness: -10.0,
            spectral_centroid: 2500.0,
            zero_crossing_rate: 0.1,
            mfcc_variance: 0.6,
        };
        Analysis {
            file_path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            status: AnalysisStatus::Completed,
            derived_metrics: DerivedMetrics::from_features(&features),
            features,
            metadata: TrackMetadata {
                title: Some(path.to_string()),
                duration,
                file_size: 1 << 20,
                extension: "mp3".into(),
                analyzed_at: 1_700_000_000.0,
                ..TrackMetadata::default()
            },
            camelot: CamelotInfo {
                key: key.to_string(),
                camelot,
                key_confidence: 0.9,
                compatible_keys: harmony.compatible(camelot),
            },
            mood: MoodInfo::neutral(),
            time_series_features: Vec::new(),
            errors: Vec::new(),
            version: RECORD_VERSION.to_string(),
        }
    }

    fn order(playlist: &Playlist) -> Vec<&str> {
        playlist.tracks.iter().map(|t| t.analysis.file_path.as_str()).collect()
    }

    #[test]
    fn test_too_few_tracks_is_validation_error() {
        let opt = PlaylistOptimizer::with_defaults();
        assert!(matches!(
            opt.create_playlist(&[], None, None, None),
            Err(PlaylistError::Validation(_))
        ));

        let two = vec![
            track("/m/a.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b.mp3", "G", 124.0, 0.6, 0.5, 0.5, 200.0),
        ];
        assert!(matches!(
            opt.create_playlist(&two, None, None, None),
            Err(PlaylistError::Validation(_))
        ));

        let three = vec![
            track("/m/a.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b.mp3", "G", 124.0, 0.6, 0.5, 0.5, 200.0),
            track("/m/c.mp3", "D", 128.0, 0.7, 0.5, 0.5, 200.0),
        ];
        assert!(opt.create_playlist(&three, None, None, None).is_ok());
    }

    #[test]
    fn test_unknown_preset() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b.mp3", "G", 124.0, 0.6, 0.5, 0.5, 200.0),
            track("/m/c.mp3", "D", 128.0, 0.7, 0.5, 0.5, 200.0),
        ];
        assert!(matches!(
            opt.create_playlist(&tracks, Some("No Such Preset"), None, None),
            Err(PlaylistError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_harmonic_chain_is_deterministic() {
        let opt = PlaylistOptimizer::with_defaults();
        // C/8B, Am/8A, G/9B, Em/9A, D/10B at rising BPM
        let tracks = vec![
            track("/m/t1.mp3", "C", 120.0, 0.5, 0.5, 0.5, 240.0),
            track("/m/t2.mp3", "Am", 122.0, 0.5, 0.5, 0.5, 240.0),
            track("/m/t3.mp3", "G", 124.0, 0.5, 0.5, 0.5, 240.0),
            track("/m/t4.mp3", "Em", 126.0, 0.5, 0.5, 0.5, 240.0),
            track("/m/t5.mp3", "D", 128.0, 0.5, 0.5, 0.5, 240.0),
        ];

        let first = opt
            .create_playlist(&tracks, Some("DJ Set - Harmonic Flow"), None, None)
            .unwrap();
        // Anchor is t3 (best average compatibility), then the greedy chain:
        // 9B→9A (0.9), 9A→8A (0.7), 8A→8B (0.9), 8B→10B (0.1)
        assert_eq!(
            order(&first),
            vec!["/m/t3.mp3", "/m/t4.mp3", "/m/t2.mp3", "/m/t1.mp3", "/m/t5.mp3"]
        );

        // Same input in a different order still yields the identical chain
        let mut shuffled = tracks.clone();
        shuffled.reverse();
        let second = opt
            .create_playlist(&shuffled, Some("DJ Set - Harmonic Flow"), None, None)
            .unwrap();
        assert_eq!(order(&first), order(&second));

        let indices: Vec<usize> = first.tracks.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_harmonic_successor_tiebreak_by_bpm() {
        let opt = PlaylistOptimizer::with_defaults();
        // Both 9B and 7B score 0.7 from 8B; the closer BPM must win
        let tracks = vec![
            track("/m/anchor.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0), // 8B
            track("/m/near.mp3", "G", 122.0, 0.5, 0.5, 0.5, 200.0),   // 9B, Δ2
            track("/m/far.mp3", "F", 140.0, 0.5, 0.5, 0.5, 200.0),    // 7B, Δ20
        ];
        let playlist = opt
            .create_playlist(&tracks, Some("DJ Set - Harmonic Flow"), None, None)
            .unwrap();
        let chain = order(&playlist);
        let anchor_pos = chain.iter().position(|p| *p == "/m/anchor.mp3").unwrap();
        let near_pos = chain.iter().position(|p| *p == "/m/near.mp3").unwrap();
        let far_pos = chain.iter().position(|p| *p == "/m/far.mp3").unwrap();
        assert!(near_pos == anchor_pos + 1 || anchor_pos == near_pos + 1);
        assert_eq!(far_pos, 2);
    }

    #[test]
    fn test_energy_flow_buckets() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/high.mp3", "C", 128.0, 0.9, 0.5, 0.5, 200.0),
            track("/m/low.mp3", "G", 100.0, 0.2, 0.5, 0.5, 200.0),
            track("/m/mid.mp3", "D", 118.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/low2.mp3", "A", 95.0, 0.35, 0.5, 0.5, 200.0),
        ];
        // No "progression" rule: buckets low→mid→high, ascending inside
        let rules = vec![Rule::new("energy_balance", "spread the arc", 0.5)];
        let playlist = opt
            .create_playlist(&tracks, Some("Party Mix - Energy Build"), Some(&rules), Some(10_000))
            .unwrap();
        assert_eq!(
            order(&playlist),
            vec!["/m/low.mp3", "/m/low2.mp3", "/m/mid.mp3", "/m/high.mp3"]
        );
    }

    #[test]
    fn test_energy_flow_progression_rule() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/c.mp3", "C", 128.0, 0.9, 0.5, 0.5, 200.0),
            track("/m/a.mp3", "G", 100.0, 0.2, 0.5, 0.5, 200.0),
            track("/m/b.mp3", "D", 118.0, 0.5, 0.5, 0.5, 200.0),
        ];
        // The preset's own energy_progression rule sorts strictly ascending
        let playlist = opt
            .create_playlist(&tracks, Some("Party Mix - Energy Build"), None, Some(10_000))
            .unwrap();
        assert_eq!(order(&playlist), vec!["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"]);
    }

    #[test]
    fn test_bpm_transition_median_seed() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/b100.mp3", "C", 100.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b110.mp3", "C", 110.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b120.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b130.mp3", "C", 130.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b140.mp3", "C", 140.0, 0.5, 0.5, 0.5, 200.0),
        ];
        // No gradual/stability rule: median seed then nearest-BPM chain
        let rules = vec![Rule::new("smooth_mixing", "keep deltas small", 0.5)];
        let playlist = opt
            .create_playlist(&tracks, Some("Warm-Up Set"), Some(&rules), Some(10_000))
            .unwrap();
        assert_eq!(
            order(&playlist),
            vec!["/m/b120.mp3", "/m/b110.mp3", "/m/b100.mp3", "/m/b130.mp3", "/m/b140.mp3"]
        );
    }

    #[test]
    fn test_bpm_transition_gradual_increase() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/fast.mp3", "C", 140.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/slow.mp3", "C", 95.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/mid.mp3", "C", 120.0, 0.5, 0.5, 0.5, 200.0),
        ];
        // Warm-Up Set carries gradual_bpm_increase: ascending BPM
        let playlist = opt
            .create_playlist(&tracks, Some("Warm-Up Set"), None, Some(10_000))
            .unwrap();
        assert_eq!(order(&playlist), vec!["/m/slow.mp3", "/m/mid.mp3", "/m/fast.mp3"]);
    }

    #[test]
    fn test_bpm_transition_stability_strata() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 122.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/b.mp3", "C", 98.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/c.mp3", "C", 104.0, 0.5, 0.5, 0.5, 200.0),
            track("/m/d.mp3", "C", 102.0, 0.5, 0.5, 0.5, 200.0),
        ];
        let rules = vec![Rule::new("tempo_stability", "Stable BPM", 0.7)];
        let playlist = opt
            .create_playlist(&tracks, Some("Warm-Up Set"), Some(&rules), Some(10_000))
            .unwrap();
        assert_eq!(
            order(&playlist),
            vec!["/m/b.mp3", "/m/d.mp3", "/m/c.mp3", "/m/a.mp3"]
        );
    }

    #[test]
    fn test_mood_progression_default_order() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/mel.mp3", "Am", 90.0, 0.3, 0.2, 0.3, 200.0),   // melancholic
            track("/m/hap.mp3", "C", 100.0, 0.3, 0.7, 0.5, 200.0),   // happy
            track("/m/ene.mp3", "D", 128.0, 0.8, 0.7, 0.8, 200.0),   // energetic
            track("/m/neu.mp3", "G", 115.0, 0.5, 0.5, 0.5, 200.0),   // neutral
        ];
        // Rules without mood/coherent markers: default calm→happy→energetic,
        // then unmatched groups in taxonomy order
        let rules = vec![Rule::new("flow", "plain", 0.5)];
        let playlist = opt
            .create_playlist(&tracks, Some("Chill Session"), Some(&rules), Some(10_000))
            .unwrap();
        assert_eq!(
            order(&playlist),
            vec!["/m/hap.mp3", "/m/ene.mp3", "/m/mel.mp3", "/m/neu.mp3"]
        );
    }

    #[test]
    fn test_mood_progression_uplifting_order() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/ene.mp3", "D", 128.0, 0.8, 0.7, 0.8, 200.0),   // energetic
            track("/m/mel.mp3", "Am", 90.0, 0.3, 0.2, 0.3, 200.0),   // melancholic
            track("/m/hap.mp3", "C", 100.0, 0.3, 0.7, 0.5, 200.0),   // happy
        ];
        let rules = vec![Rule::new("mood_arc", "an uplifting journey", 0.8)];
        let playlist = opt
            .create_playlist(&tracks, Some("Chill Session"), Some(&rules), Some(10_000))
            .unwrap();
        assert_eq!(
            order(&playlist),
            vec!["/m/mel.mp3", "/m/hap.mp3", "/m/ene.mp3"]
        );
    }

    #[test]
    fn test_mood_progression_coherent_puts_dominant_first() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/hap.mp3", "C", 100.0, 0.3, 0.7, 0.5, 200.0),   // happy
            track("/m/ene1.mp3", "D", 128.0, 0.8, 0.7, 0.8, 200.0),  // energetic
            track("/m/ene2.mp3", "G", 126.0, 0.9, 0.8, 0.8, 200.0),  // energetic
        ];
        let rules = vec![Rule::new("coherent_mood", "group alike moods", 0.9)];
        let playlist = opt
            .create_playlist(&tracks, Some("Chill Session"), Some(&rules), Some(10_000))
            .unwrap();
        let got = order(&playlist);
        // The energetic pair leads, in base (bpm) order
        assert_eq!(got, vec!["/m/ene2.mp3", "/m/ene1.mp3", "/m/hap.mp3"]);
    }

    #[test]
    fn test_hybrid_sorted_descending_and_deterministic() {
        let opt = PlaylistOptimizer::with_defaults();
        // Identical keys neutralize the harmonic axis
        let tracks = vec![
            track("/m/meh.mp3", "C", 120.0, 0.2, 0.2, 0.2, 200.0),
            track("/m/best.mp3", "C", 124.0, 0.9, 0.9, 0.9, 200.0),
            track("/m/ok.mp3", "C", 122.0, 0.5, 0.5, 0.5, 200.0),
        ];
        let first = opt
            .create_playlist(&tracks, Some("Peak Time"), None, Some(10_000))
            .unwrap();
        assert_eq!(
            order(&first),
            vec!["/m/best.mp3", "/m/ok.mp3", "/m/meh.mp3"]
        );
        let second = opt
            .create_playlist(&tracks, Some("Peak Time"), None, Some(10_000))
            .unwrap();
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn test_hybrid_weights_boost_and_normalize() {
        let energy_rule = Rule::new("high_energy_only", "boost", 1.0);
        let refs: Vec<&Rule> = vec![&energy_rule];
        let weights = hybrid_weights(&refs);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // energy went from 0.25 to 0.35 before normalization
        assert!(weights["energy"] > weights["danceability"]);

        let none: Vec<&Rule> = Vec::new();
        let base = hybrid_weights(&none);
        assert!((base["harmonic"] - 0.30).abs() < 1e-9);
        assert!((base.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_rules_filter() {
        let tracks = vec![
            track("/m/keep.mp3", "C", 125.0, 0.8, 0.5, 0.5, 200.0),
            track("/m/slow.mp3", "G", 90.0, 0.9, 0.5, 0.5, 200.0),
            track("/m/flat.mp3", "D", 126.0, 0.3, 0.5, 0.5, 200.0),
            track("/m/also.mp3", "A", 128.0, 0.75, 0.5, 0.5, 200.0),
        ];
        let mut custom = PresetCatalog::builtin();
        custom
            .save_custom(Preset {
                name: "Filtered".into(),
                description: "test".into(),
                algorithm: Algorithm::Custom,
                rules: vec![
                    Rule::new("high_energy_filter", "", 1.0)
                        .with_parameter("min_energy", serde_json::json!(0.7)),
                    Rule::new("bpm_range_filter", "", 1.0)
                        .with_parameter("min_bpm", serde_json::json!(100))
                        .with_parameter("max_bpm", serde_json::json!(130)),
                ],
                target_duration_minutes: None,
                energy_curve: EnergyCurve::Custom,
                mood_flow: MoodFlow::Mixed,
                created_at: None,
            })
            .unwrap();
        let opt = PlaylistOptimizer::new(custom, HarmonyModel::new());
        let playlist = opt
            .create_playlist(&tracks, Some("Filtered"), None, None)
            .unwrap();
        assert_eq!(order(&playlist), vec!["/m/keep.mp3", "/m/also.mp3"]);
    }

    #[test]
    fn test_duration_trim_with_tolerance() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 100.0, 0.1, 0.5, 0.5, 900.0),
            track("/m/b.mp3", "G", 110.0, 0.2, 0.5, 0.5, 600.0),
            track("/m/c.mp3", "D", 120.0, 0.3, 0.5, 0.5, 320.0),
            track("/m/d.mp3", "A", 130.0, 0.4, 0.5, 0.5, 300.0),
        ];
        // energy_progression keeps input ascending by energy = input order
        let playlist = opt
            .create_playlist(&tracks, Some("Party Mix - Energy Build"), None, Some(30))
            .unwrap();
        let total = playlist.metadata.total_duration_seconds;
        // 900 + 600 + 320 = 1820: inside the 30 s tolerance window
        assert_eq!(playlist.tracks.len(), 3);
        assert!((1800.0..=1830.0).contains(&total));
    }

    #[test]
    fn test_duration_trim_strict_cutoff() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 100.0, 0.1, 0.5, 0.5, 900.0),
            track("/m/b.mp3", "G", 110.0, 0.2, 0.5, 0.5, 600.0),
            track("/m/c.mp3", "D", 120.0, 0.3, 0.5, 0.5, 400.0),
        ];
        let playlist = opt
            .create_playlist(&tracks, Some("Party Mix - Energy Build"), None, Some(30))
            .unwrap();
        // 900 + 600 = 1500; adding 400 overshoots past tolerance
        assert_eq!(playlist.tracks.len(), 2);
        assert_eq!(playlist.metadata.total_duration_seconds, 1500.0);
    }

    #[test]
    fn test_metadata_aggregates() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 120.0, 0.4, 0.6, 0.5, 180.0),
            track("/m/b.mp3", "Am", 124.0, 0.6, 0.4, 0.7, 240.0),
            track("/m/c.mp3", "C", 128.0, 0.8, 0.8, 0.9, 300.0),
        ];
        let playlist = opt
            .create_playlist(&tracks, Some("DJ Set - Harmonic Flow"), None, None)
            .unwrap();
        let m = &playlist.metadata;
        assert_eq!(m.total_tracks, 3);
        assert_eq!(m.total_duration_seconds, 720.0);
        assert_eq!(m.total_duration_minutes, 12.0);
        assert!((m.average_energy - 0.6).abs() < 1e-9);
        assert_eq!(m.bpm_stats.min, 120.0);
        assert_eq!(m.bpm_stats.max, 128.0);
        assert!((m.bpm_stats.avg - 124.0).abs() < 1e-9);
        assert_eq!(m.key_distribution["8B"], 2);
        assert_eq!(m.key_distribution["8A"], 1);
        assert_eq!(m.energy_progression.len(), 3);
        assert_eq!(m.preset_name, "DJ Set - Harmonic Flow");
        assert_eq!(playlist.status, "completed");
        assert_eq!(playlist.rules_applied.len(), 4);
    }

    #[test]
    fn test_progress_phases() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 120.0, 0.4, 0.6, 0.5, 180.0),
            track("/m/b.mp3", "Am", 124.0, 0.6, 0.4, 0.7, 240.0),
            track("/m/c.mp3", "C", 128.0, 0.8, 0.8, 0.9, 300.0),
        ];
        let mut phases: Vec<String> = Vec::new();
        opt.create_playlist_with_progress(&tracks, None, None, None, &mut |p| {
            phases.push(p.to_string());
        })
        .unwrap();
        assert!(phases.first().unwrap().contains("Initializing"));
        assert!(phases.iter().any(|p| p.contains("harmonic")));
        assert!(phases.last().unwrap().contains("complete"));
    }

    #[test]
    fn test_playlist_record_shape() {
        let opt = PlaylistOptimizer::with_defaults();
        let tracks = vec![
            track("/m/a.mp3", "C", 120.0, 0.4, 0.6, 0.5, 180.0),
            track("/m/b.mp3", "Am", 124.0, 0.6, 0.4, 0.7, 240.0),
            track("/m/c.mp3", "C", 128.0, 0.8, 0.8, 0.9, 300.0),
        ];
        let playlist = opt.create_playlist(&tracks, None, None, None).unwrap();
        let json = serde_json::to_value(&playlist).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["algorithm"], "harmonic");
        assert_eq!(json["tracks"][0]["index"], 0);
        assert!(json["tracks"][0]["features"]["bpm"].is_f64());
        assert!(json["metadata"]["bpm_stats"]["avg"].is_f64());
        assert!(json["rules_applied"][0]["name"].is_string());
    }
}

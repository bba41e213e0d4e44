use crate::harmony::{parse_key, KeyMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Width of the linear fall-off around fuzzy boundaries.
const FUZZY_BAND: f64 = 0.2;

/// Closed mood taxonomy. External surfaces serialize these as strings;
/// internal code never branches on free-form text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Euphoric,
    Driving,
    Dark,
    Chill,
    Melancholic,
    Aggressive,
    Uplifting,
    Mysterious,
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 9] = [
        Mood::Euphoric,
        Mood::Driving,
        Mood::Dark,
        Mood::Chill,
        Mood::Melancholic,
        Mood::Aggressive,
        Mood::Uplifting,
        Mood::Mysterious,
        Mood::Neutral,
    ];

    /// Every mood a rule can award; neutral is the absence of a confident match.
    pub const CLASSIFIABLE: [Mood; 8] = [
        Mood::Euphoric,
        Mood::Driving,
        Mood::Dark,
        Mood::Chill,
        Mood::Melancholic,
        Mood::Aggressive,
        Mood::Uplifting,
        Mood::Mysterious,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Euphoric => "euphoric",
            Mood::Driving => "driving",
            Mood::Dark => "dark",
            Mood::Chill => "chill",
            Mood::Melancholic => "melancholic",
            Mood::Aggressive => "aggressive",
            Mood::Uplifting => "uplifting",
            Mood::Mysterious => "mysterious",
            Mood::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown mood: {s:?}"))
    }
}

/// Raw feature values handed to the classifier. BPM is absolute,
/// loudness is in dB, spectral centroid in Hz; the classifier owns
/// normalization.
#[derive(Debug, Clone)]
pub struct MoodInput {
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub bpm: f64,
    pub loudness: f64,
    pub spectral_centroid: f64,
    pub key: Option<String>,
}

/// Features mapped onto [0, 1] axes plus the parsed mode.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeatures {
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub bpm: f64,
    pub loudness: f64,
    pub spectral_centroid: f64,
    pub mode: KeyMode,
    /// Chromatic index 0..11 of the key's tonic (C=0), for the model backend.
    pub key_numeric: f64,
}

impl NormalizedFeatures {
    pub fn from_input(input: &MoodInput) -> Self {
        let (key_numeric, mode) = input
            .key
            .as_deref()
            .and_then(parse_key)
            .map(|(idx, mode)| (idx as f64, mode))
            .unwrap_or((0.0, KeyMode::Major));

        Self {
            energy: clamp_unit(input.energy),
            valence: clamp_unit(input.valence),
            danceability: clamp_unit(input.danceability),
            bpm: normalize_bpm(input.bpm),
            loudness: normalize_loudness(input.loudness),
            spectral_centroid: normalize_centroid(input.spectral_centroid),
            mode,
            key_numeric,
        }
    }

    fn axis(&self, feature: FeatureId) -> f64 {
        match feature {
            FeatureId::Energy => self.energy,
            FeatureId::Valence => self.valence,
            FeatureId::Danceability => self.danceability,
            FeatureId::Bpm => self.bpm,
            FeatureId::Loudness => self.loudness,
            FeatureId::SpectralCentroid => self.spectral_centroid,
            FeatureId::Mode => match self.mode {
                KeyMode::Major => 1.0,
                KeyMode::Minor => 0.0,
            },
        }
    }

    /// Fixed feature vector for the model backend:
    /// [energy, valence, danceability, bpm, loudness, spectral_centroid,
    ///  key_numeric, mode_numeric].
    pub fn model_vector(&self) -> [f64; 8] {
        [
            self.energy,
            self.valence,
            self.danceability,
            self.bpm,
            self.loudness,
            self.spectral_centroid,
            self.key_numeric,
            match self.mode {
                KeyMode::Major => 1.0,
                KeyMode::Minor => 0.0,
            },
        ]
    }
}

pub fn normalize_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 10.0 {
        clamp_unit((bpm - 60.0) / 140.0)
    } else {
        clamp_unit(bpm)
    }
}

pub fn normalize_loudness(db: f64) -> f64 {
    if db.is_finite() && db < 10.0 {
        clamp_unit((db + 60.0) / 60.0)
    } else {
        clamp_unit(db)
    }
}

pub fn normalize_centroid(hz: f64) -> f64 {
    if hz.is_finite() && hz > 10.0 {
        clamp_unit(hz / 8000.0)
    } else {
        clamp_unit(hz)
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureId {
    Energy,
    Valence,
    Danceability,
    Bpm,
    Loudness,
    SpectralCentroid,
    Mode,
}

/// A single condition over one normalized axis.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    /// 1 inside [lo, hi]; linear fall-off over the fuzzy band either side.
    Range(f64, f64),
    /// Linear ramp over [t - band, t] up to 1.
    FuzzyHigh(f64),
    /// Mirror of FuzzyHigh.
    FuzzyLow(f64),
    /// Hard threshold.
    Above(f64),
    /// Hard threshold.
    Below(f64),
    /// 1 if within 0.1 of the value.
    EqualsNum(f64),
    /// 1 if the parsed mode matches (case-insensitive at the string boundary).
    EqualsMode(KeyMode),
}

#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub feature: FeatureId,
    pub op: Op,
}

impl Condition {
    fn score(&self, features: &NormalizedFeatures) -> f64 {
        if let Op::EqualsMode(mode) = self.op {
            return if features.mode == mode { 1.0 } else { 0.0 };
        }
        let value = features.axis(self.feature);
        match self.op {
            Op::Range(lo, hi) => {
                if (lo..=hi).contains(&value) {
                    1.0
                } else if value < lo {
                    (1.0 - (lo - value) / FUZZY_BAND).max(0.0)
                } else {
                    (1.0 - (value - hi) / FUZZY_BAND).max(0.0)
                }
            }
            Op::FuzzyHigh(t) => {
                if value >= t {
                    1.0
                } else if value >= t - FUZZY_BAND {
                    (value - (t - FUZZY_BAND)) / FUZZY_BAND
                } else {
                    0.0
                }
            }
            Op::FuzzyLow(t) => {
                if value <= t {
                    1.0
                } else if value <= t + FUZZY_BAND {
                    1.0 - (value - t) / FUZZY_BAND
                } else {
                    0.0
                }
            }
            Op::Above(v) => (value > v) as u8 as f64,
            Op::Below(v) => (value < v) as u8 as f64,
            Op::EqualsNum(v) => ((value - v).abs() < 0.1) as u8 as f64,
            Op::EqualsMode(_) => unreachable!(),
        }
    }
}

/// A weighted conjunction of conditions for one mood.
#[derive(Debug, Clone)]
pub struct MoodRule {
    pub name: String,
    pub weight: f64,
    pub conditions: Vec<Condition>,
}

impl MoodRule {
    /// AND semantics: the rule scores the minimum of its conditions.
    fn score(&self, features: &NormalizedFeatures) -> f64 {
        if self.conditions.is_empty() {
            return 0.0;
        }
        self.conditions
            .iter()
            .map(|c| c.score(features))
            .fold(f64::INFINITY, f64::min)
            .clamp(0.0, 1.0)
    }
}

/// Probability output of an optional gradient-boosted mood model.
/// Implementations return one probability per classifiable mood, in
/// `Mood::CLASSIFIABLE` order.
pub trait MoodModel: Send + Sync {
    fn predict(&self, features: &[f64; 8]) -> Result<Vec<f64>, String>;
}

/// Classification capability: heuristic rules, optionally superseded by a
/// loaded model.
pub enum MoodBackend {
    Heuristic,
    Model(Box<dyn MoodModel>),
}

/// Classification output: the winning mood, its confidence, and the full
/// score vector (sums to 1).
#[derive(Debug, Clone, PartialEq)]
pub struct MoodResult {
    pub primary: Mood,
    pub confidence: f64,
    pub scores: BTreeMap<Mood, f64>,
}

/// Aggregate statistics over a batch of classified feature sets.
#[derive(Debug, Clone, Serialize)]
pub struct MoodStatistics {
    pub total_tracks: usize,
    pub mood_distribution: BTreeMap<Mood, usize>,
    pub mood_percentages: BTreeMap<Mood, f64>,
    pub average_confidence: f64,
    pub dominant_mood: Mood,
}

/// Rule engine over normalized features with fuzzy membership, pluggable
/// by a model backend gated on confidence.
pub struct MoodClassifier {
    rules: Vec<(Mood, Vec<MoodRule>)>,
    backend: MoodBackend,
    confidence_threshold: f64,
}

impl Default for MoodClassifier {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl MoodClassifier {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            rules: default_rules(),
            backend: MoodBackend::Heuristic,
            confidence_threshold,
        }
    }

    pub fn with_model(confidence_threshold: f64, model: Box<dyn MoodModel>) -> Self {
        Self {
            rules: default_rules(),
            backend: MoodBackend::Model(model),
            confidence_threshold,
        }
    }

    /// Classify a track's features. The model backend is consulted first
    /// when present; any model failure or low-confidence prediction falls
    /// back to the rule engine without surfacing an error.
    pub fn classify(&self, input: &MoodInput) -> MoodResult {
        let features = NormalizedFeatures::from_input(input);

        if let MoodBackend::Model(model) = &self.backend {
            match model.predict(&features.model_vector()) {
                Ok(probs) if probs.len() == Mood::CLASSIFIABLE.len() => {
                    let mut scores = BTreeMap::new();
                    for (mood, p) in Mood::CLASSIFIABLE.iter().zip(&probs) {
                        scores.insert(*mood, clamp_unit(*p));
                    }
                    let (best, confidence) = argmax(&scores);
                    if confidence >= self.confidence_threshold {
                        return finish(best, confidence, scores);
                    }
                    log::debug!(
                        "model confidence {confidence:.2} below threshold, using rule engine"
                    );
                }
                Ok(probs) => {
                    log::warn!(
                        "mood model returned {} probabilities, expected {}; using rule engine",
                        probs.len(),
                        Mood::CLASSIFIABLE.len()
                    );
                }
                Err(e) => {
                    log::warn!("mood model failed, using rule engine: {e}");
                }
            }
        }

        self.classify_heuristic(&features)
    }

    fn classify_heuristic(&self, features: &NormalizedFeatures) -> MoodResult {
        let mut scores = BTreeMap::new();
        for (mood, rules) in &self.rules {
            scores.insert(*mood, weighted_mean(rules, features));
        }

        let (best, confidence) = argmax(&scores);
        if confidence < self.confidence_threshold {
            return finish(Mood::Neutral, 0.0, scores);
        }
        finish(best, confidence, scores)
    }

    /// Aggregate mood statistics for a list of feature sets.
    pub fn statistics(&self, inputs: &[MoodInput]) -> MoodStatistics {
        let mut distribution: BTreeMap<Mood, usize> = Mood::ALL.iter().map(|m| (*m, 0)).collect();
        let mut confidence_sum = 0.0;

        for input in inputs {
            let result = self.classify(input);
            *distribution.entry(result.primary).or_insert(0) += 1;
            confidence_sum += result.confidence;
        }

        let total = inputs.len();
        let percentages = distribution
            .iter()
            .map(|(m, c)| {
                let pct = if total > 0 { *c as f64 / total as f64 * 100.0 } else { 0.0 };
                (*m, pct)
            })
            .collect();
        let dominant = distribution
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(m, _)| *m)
            .unwrap_or(Mood::Neutral);

        MoodStatistics {
            total_tracks: total,
            mood_distribution: distribution,
            mood_percentages: percentages,
            average_confidence: if total > 0 { confidence_sum / total as f64 } else { 0.0 },
            dominant_mood: if total > 0 { dominant } else { Mood::Neutral },
        }
    }
}

fn weighted_mean(rules: &[MoodRule], features: &NormalizedFeatures) -> f64 {
    let mut total = 0.0;
    let mut weight = 0.0;
    for rule in rules {
        total += rule.score(features) * rule.weight;
        weight += rule.weight;
    }
    if weight == 0.0 { 0.0 } else { (total / weight).min(1.0) }
}

/// First maximal entry wins ties, in taxonomy declaration order.
fn argmax(scores: &BTreeMap<Mood, f64>) -> (Mood, f64) {
    let mut best = (Mood::Neutral, f64::NEG_INFINITY);
    for mood in Mood::CLASSIFIABLE {
        if let Some(&s) = scores.get(&mood) {
            if s > best.1 {
                best = (mood, s);
            }
        }
    }
    if best.1.is_finite() { best } else { (Mood::Neutral, 0.0) }
}

/// Attach the neutral residual and normalize so the vector sums to 1.
fn finish(primary: Mood, confidence: f64, mut scores: BTreeMap<Mood, f64>) -> MoodResult {
    scores.insert(Mood::Neutral, (1.0 - confidence).max(0.0));
    let sum: f64 = scores.values().sum();
    if sum > 0.0 {
        for v in scores.values_mut() {
            *v /= sum;
        }
    }
    MoodResult { primary, confidence, scores }
}

fn rule(mood: Mood, conditions: Vec<Condition>) -> (Mood, Vec<MoodRule>) {
    (
        mood,
        vec![MoodRule {
            name: format!("{}_main", mood.as_str()),
            weight: 1.0,
            conditions,
        }],
    )
}

fn cond(feature: FeatureId, op: Op) -> Condition {
    Condition { feature, op }
}

/// Default mood combinations. BPM and loudness bounds are normalized onto
/// the classifier's axes at construction time.
fn default_rules() -> Vec<(Mood, Vec<MoodRule>)> {
    use FeatureId::*;
    vec![
        rule(
            Mood::Euphoric,
            vec![
                cond(Energy, Op::Range(0.7, 1.0)),
                cond(Valence, Op::Range(0.6, 1.0)),
                cond(Danceability, Op::Range(0.6, 1.0)),
            ],
        ),
        rule(
            Mood::Driving,
            vec![
                cond(Energy, Op::Range(0.6, 0.9)),
                cond(Valence, Op::Range(0.3, 0.7)),
                cond(Bpm, Op::Range(normalize_bpm(110.0), normalize_bpm(140.0))),
            ],
        ),
        rule(
            Mood::Dark,
            vec![
                cond(Valence, Op::Range(0.0, 0.4)),
                cond(Energy, Op::Range(0.4, 0.8)),
                cond(Mode, Op::EqualsMode(KeyMode::Minor)),
            ],
        ),
        rule(
            Mood::Chill,
            vec![
                cond(Energy, Op::Range(0.0, 0.4)),
                cond(Valence, Op::Range(0.4, 0.8)),
                cond(Bpm, Op::Range(normalize_bpm(60.0), normalize_bpm(110.0))),
            ],
        ),
        rule(
            Mood::Melancholic,
            vec![
                cond(Valence, Op::Range(0.0, 0.3)),
                cond(Energy, Op::Range(0.0, 0.5)),
                cond(Mode, Op::EqualsMode(KeyMode::Minor)),
            ],
        ),
        rule(
            Mood::Aggressive,
            vec![
                cond(Energy, Op::Range(0.7, 1.0)),
                cond(Valence, Op::Range(0.0, 0.3)),
                cond(Loudness, Op::Range(normalize_loudness(-5.0), normalize_loudness(0.0))),
            ],
        ),
        rule(
            Mood::Uplifting,
            vec![
                cond(Valence, Op::Range(0.7, 1.0)),
                cond(Energy, Op::Range(0.5, 0.9)),
                cond(Danceability, Op::Range(0.6, 1.0)),
            ],
        ),
        rule(
            Mood::Mysterious,
            vec![
                cond(Valence, Op::Range(0.2, 0.6)),
                cond(Energy, Op::Range(0.3, 0.7)),
                cond(SpectralCentroid, Op::Range(0.0, 0.5)),
            ],
        ),
    ]
}

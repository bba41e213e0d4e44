use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Sequencing algorithm kinds. A closed set; external surfaces see the
/// snake_case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Harmonic,
    EnergyFlow,
    MoodProgression,
    BpmTransition,
    KeyProgression,
    HybridSmart,
    Custom,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Harmonic => "harmonic",
            Algorithm::EnergyFlow => "energy_flow",
            Algorithm::MoodProgression => "mood_progression",
            Algorithm::BpmTransition => "bpm_transition",
            Algorithm::KeyProgression => "key_progression",
            Algorithm::HybridSmart => "hybrid_smart",
            Algorithm::Custom => "custom",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Algorithm::Harmonic => "Harmonic transitions over the Camelot wheel",
            Algorithm::EnergyFlow => "Optimized energy arc for natural progression",
            Algorithm::MoodProgression => "Coherent mood transitions",
            Algorithm::BpmTransition => "Smooth BPM transitions for DJ sets",
            Algorithm::KeyProgression => "Key-based progression around the circle of fifths",
            Algorithm::HybridSmart => "Weighted combination of all scoring axes",
            Algorithm::Custom => "Rule-driven filtering and ordering",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyCurve {
    #[default]
    GradualBuild,
    PeakValley,
    Steady,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodFlow {
    #[default]
    Coherent,
    Contrasting,
    Mixed,
    Uplifting,
    Building,
    Energetic,
}

/// A weighted, optionally-enabled tuning knob over the optimizer's scoring
/// or filtering behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub description: String,
    /// Weight in [0, 1].
    pub weight: f64,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

fn enabled_default() -> bool {
    true
}

impl Rule {
    pub fn new(name: &str, description: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            weight: weight.clamp(0.0, 1.0),
            enabled: true,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub(crate) fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }

    pub(crate) fn mentions(&self, needle: &str) -> bool {
        self.name_contains(needle) || self.description.to_lowercase().contains(needle)
    }
}

/// A named bundle of (algorithm, rules, target curve/flow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub algorithm: Algorithm,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub target_duration_minutes: Option<u32>,
    #[serde(default)]
    pub energy_curve: EnergyCurve,
    #[serde(default)]
    pub mood_flow: MoodFlow,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The built-in catalogue of DJ scenarios.
pub fn default_presets() -> Vec<Preset> {
    vec![
        Preset {
            name: "DJ Set - Harmonic Flow".into(),
            description: "Harmonic transitions for professional DJ sets".into(),
            algorithm: Algorithm::Harmonic,
            rules: vec![
                Rule::new("camelot_compatibility", "Prefer harmonically compatible keys", 0.8),
                Rule::new("bpm_transition", "Smooth BPM transitions (±5 BPM)", 0.6),
                Rule::new("energy_flow", "Gradual energy build", 0.4),
                Rule::new("key_progression", "Circle-of-fifths progression", 0.7),
            ],
            target_duration_minutes: None,
            energy_curve: EnergyCurve::GradualBuild,
            mood_flow: MoodFlow::Coherent,
            created_at: None,
        },
        Preset {
            name: "Party Mix - Energy Build".into(),
            description: "Energy-building playlist for parties".into(),
            algorithm: Algorithm::EnergyFlow,
            rules: vec![
                Rule::new("energy_progression", "Continuous energy build", 0.9),
                Rule::new("danceability_priority", "Prefer danceable tracks", 0.8),
                Rule::new("bpm_acceleration", "BPM rises over time", 0.7),
                Rule::new("mood_uplifting", "Prefer a positive mood", 0.6),
            ],
            target_duration_minutes: Some(60),
            energy_curve: EnergyCurve::GradualBuild,
            mood_flow: MoodFlow::Uplifting,
            created_at: None,
        },
        Preset {
            name: "Chill Session".into(),
            description: "Relaxed playlist for quiet moments".into(),
            algorithm: Algorithm::MoodProgression,
            rules: vec![
                Rule::new("low_energy_priority", "Prefer calm tracks", 0.8),
                Rule::new("mood_coherence", "Mood coherence", 0.9),
                Rule::new("tempo_stability", "Stable BPM (±3 BPM)", 0.7),
                Rule::new("valence_consistency", "Consistent valence", 0.6),
            ],
            target_duration_minutes: Some(45),
            energy_curve: EnergyCurve::Steady,
            mood_flow: MoodFlow::Coherent,
            created_at: None,
        },
        Preset {
            name: "Peak Time".into(),
            description: "High-energy playlist for prime time".into(),
            algorithm: Algorithm::HybridSmart,
            rules: vec![
                Rule::new("high_energy_only", "High-energy tracks only", 0.9),
                Rule::new("peak_bpm_range", "BPM 125-135", 0.8),
                Rule::new("crowd_favorites", "Prefer well-known tracks", 0.7),
                Rule::new("harmonic_mixing", "Harmonic transitions", 0.6),
            ],
            target_duration_minutes: Some(90),
            energy_curve: EnergyCurve::PeakValley,
            mood_flow: MoodFlow::Energetic,
            created_at: None,
        },
        Preset {
            name: "Warm-Up Set".into(),
            description: "Gentle opener for club nights".into(),
            algorithm: Algorithm::BpmTransition,
            rules: vec![
                Rule::new("gradual_bpm_increase", "Slow BPM build", 0.8),
                Rule::new("low_to_medium_energy", "From low to medium energy", 0.7),
                Rule::new("mood_transition", "From relaxed to energetic", 0.6),
                Rule::new("harmonic_stability", "Harmonic stability", 0.5),
            ],
            target_duration_minutes: Some(30),
            energy_curve: EnergyCurve::GradualBuild,
            mood_flow: MoodFlow::Building,
            created_at: None,
        },
    ]
}

/// On-disk document for user-defined presets.
#[derive(Debug, Serialize, Deserialize)]
struct CustomPresetFile {
    version: String,
    presets: Vec<Preset>,
}

/// Read-only defaults plus mutable user-defined presets, persisted as a
/// JSON document in the presets directory.
pub struct PresetCatalog {
    defaults: Vec<Preset>,
    custom: Vec<Preset>,
    custom_path: Option<PathBuf>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetCatalog {
    /// Defaults only, nothing persisted.
    pub fn builtin() -> Self {
        Self {
            defaults: default_presets(),
            custom: Vec::new(),
            custom_path: None,
        }
    }

    /// Defaults plus any custom presets found under `dir`.
    pub fn with_dir(dir: &Path) -> Self {
        let custom_path = dir.join("custom_presets.json");
        let custom = match std::fs::read_to_string(&custom_path) {
            Ok(text) => match serde_json::from_str::<CustomPresetFile>(&text) {
                Ok(file) => file.presets,
                Err(e) => {
                    log::error!("ignoring malformed {}: {e}", custom_path.display());
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            defaults: default_presets(),
            custom,
            custom_path: Some(custom_path),
        }
    }

    /// Custom presets shadow defaults of the same name.
    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.custom
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.defaults.iter().find(|p| p.name == name))
    }

    pub fn first_default(&self) -> &Preset {
        &self.defaults[0]
    }

    pub fn all(&self) -> impl Iterator<Item = &Preset> {
        self.defaults.iter().chain(self.custom.iter())
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.defaults.iter().any(|p| p.name == name)
    }

    /// Insert or replace a custom preset by name and persist the catalogue.
    pub fn save_custom(&mut self, mut preset: Preset) -> std::io::Result<()> {
        if preset.created_at.is_none() {
            preset.created_at = Some(chrono::Utc::now().to_rfc3339());
        }
        match self.custom.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => self.custom.push(preset),
        }
        self.persist()
    }

    /// Remove a custom preset by name. Defaults cannot be deleted.
    pub fn delete_custom(&mut self, name: &str) -> std::io::Result<bool> {
        let before = self.custom.len();
        self.custom.retain(|p| p.name != name);
        if self.custom.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> std::io::Result<()> {
        let path = match &self.custom_path {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = CustomPresetFile {
            version: "2.0".to_string(),
            presets: self.custom.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

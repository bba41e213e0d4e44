use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("extraction error: {0}")]
    Extraction(String),
}

/// Decoded mono PCM at the engine's configured sample rate.
#[derive(Debug, Clone)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub beat_count: u32,
    /// Estimator self-confidence in [0, 1].
    pub confidence: f64,
}

/// Aggregated spectral descriptors over the whole signal.
#[derive(Debug, Clone, Copy)]
pub struct SpectralStats {
    pub centroid_hz: f64,
    pub rolloff_hz: f64,
    pub bandwidth_hz: f64,
    pub flatness: f64,
    pub zero_crossing_rate: f64,
    pub mfcc_variance: f64,
}

/// Descriptors for one analysis window.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub rms: f64,
    pub centroid_hz: f64,
    pub rolloff_hz: f64,
    pub zero_crossing_rate: f64,
    pub bandwidth_hz: f64,
}

/// Heuristic perceptual estimates in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct PerceptualEstimate {
    pub valence: f64,
    pub danceability: f64,
}

/// Secondary key estimate from a refining estimator.
#[derive(Debug, Clone)]
pub struct KeyRefinement {
    /// Key name in the `"C Major"` / `"A Minor"` form.
    pub key: String,
    pub confidence: f64,
}

/// DSP capability consumed by the analysis engine. The engine makes no
/// assumption about algorithmic internals; implementations wrap whatever
/// decoding and signal-processing stack is available.
pub trait FeatureKernel: Send + Sync {
    /// Decode a file to mono PCM at `sample_rate`.
    fn load(&self, path: &Path, sample_rate: u32) -> Result<Pcm, KernelError>;

    fn tempo(&self, pcm: &Pcm) -> Result<TempoEstimate, KernelError>;

    /// 12-bin pitch-class energy profile.
    fn chroma(&self, pcm: &Pcm) -> Result<[f64; 12], KernelError>;

    fn spectral(&self, pcm: &Pcm) -> Result<SpectralStats, KernelError>;

    fn perceptual(&self, pcm: &Pcm) -> Result<PerceptualEstimate, KernelError>;

    /// Descriptors for `pcm.samples[start..start + len]`.
    fn window_stats(&self, pcm: &Pcm, start: usize, len: usize) -> Result<WindowStats, KernelError>;

    /// Optional secondary tempo estimator; preferred over `tempo` when its
    /// confidence clears the engine's refinement threshold.
    fn refine_tempo(&self, _pcm: &Pcm) -> Option<TempoEstimate> {
        None
    }

    /// Optional secondary key estimator; preferred when more confident than
    /// the chroma correlation.
    fn refine_key(&self, _pcm: &Pcm) -> Option<KeyRefinement> {
        None
    }
}

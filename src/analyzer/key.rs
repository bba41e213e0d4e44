use crate::harmony::KeyMode;

/// Krumhansl–Schmuckler major profile, C-rooted.
const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl–Schmuckler minor profile, C-rooted.
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const TONICS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEstimate {
    /// Key name in the `"C Major"` / `"A Minor"` form.
    pub key: String,
    pub tonic_index: usize,
    pub mode: KeyMode,
    /// Winning profile correlation, clamped to [0, 1].
    pub confidence: f64,
}

/// Estimate the key of a chroma vector by correlating against the fixed
/// major/minor profiles at all 12 rotations and taking the best match.
/// Returns None when the chroma carries no usable information.
pub fn estimate_key(chroma: &[f64; 12]) -> Option<KeyEstimate> {
    if chroma.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut best: Option<(usize, KeyMode, f64)> = None;
    for shift in 0..12 {
        let major = correlate(chroma, &rotated(&MAJOR_PROFILE, shift));
        let minor = correlate(chroma, &rotated(&MINOR_PROFILE, shift));
        for (mode, corr) in [(KeyMode::Major, major), (KeyMode::Minor, minor)] {
            let corr = match corr {
                Some(c) => c,
                None => continue,
            };
            let better = match best {
                Some((_, _, b)) => corr > b,
                None => true,
            };
            if better {
                best = Some((shift, mode, corr));
            }
        }
    }

    let (tonic_index, mode, corr) = best?;
    let mode_word = match mode {
        KeyMode::Major => "Major",
        KeyMode::Minor => "Minor",
    };
    Some(KeyEstimate {
        key: format!("{} {}", TONICS[tonic_index], mode_word),
        tonic_index,
        mode,
        confidence: corr.clamp(0.0, 1.0),
    })
}

/// Rotate a C-rooted profile so its tonic lands on pitch class `shift`.
fn rotated(profile: &[f64; 12], shift: usize) -> [f64; 12] {
    let mut out = [0.0; 12];
    for (i, v) in out.iter_mut().enumerate() {
        *v = profile[(i + 12 - shift) % 12];
    }
    out
}

/// Pearson correlation; None when either side has zero variance.
fn correlate(a: &[f64; 12], b: &[f64; 12]) -> Option<f64> {
    let n = 12.0;
    let mean_a: f64 = a.iter().sum::<f64>() / n;
    let mean_b: f64 = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        None
    } else {
        Some(cov / denom)
    }
}

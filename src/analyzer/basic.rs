//! Reference `FeatureKernel` for 16-bit PCM WAV files.
//!
//! Estimates are intentionally simple time-domain approximations so the
//! binary works out of the box; a production deployment plugs a full DSP
//! kernel into the same trait.

use super::kernel::{
    FeatureKernel, KernelError, Pcm, PerceptualEstimate, SpectralStats, TempoEstimate, WindowStats,
};
use std::path::Path;

/// C4..B4 equal-temperament frequencies, A4 = 440 Hz.
const CHROMATIC_HZ: [f64; 12] = [
    261.63, 277.18, 293.66, 311.13, 329.63, 349.23, 369.99, 392.00, 415.30, 440.00, 466.16, 493.88,
];

/// Hop size for the coarse onset envelope used by tempo tracking.
const ENVELOPE_HOP: usize = 1024;

#[derive(Debug, Default)]
pub struct TimeDomainKernel;

impl TimeDomainKernel {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureKernel for TimeDomainKernel {
    fn load(&self, path: &Path, sample_rate: u32) -> Result<Pcm, KernelError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "wav" {
            return Err(KernelError::Decode(format!(
                "the built-in kernel decodes WAV only, not {ext:?}; plug a full feature kernel for other containers"
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| KernelError::Decode(e.to_string()))?;
        let (samples, source_rate) = decode_wav_pcm16(&bytes)?;
        Ok(Pcm {
            samples: resample_nearest(&samples, source_rate, sample_rate),
            sample_rate,
        })
    }

    fn tempo(&self, pcm: &Pcm) -> Result<TempoEstimate, KernelError> {
        let envelope = onset_envelope(&pcm.samples);
        if envelope.len() < 8 {
            return Err(KernelError::Extraction("signal too short for tempo".into()));
        }
        let hop_rate = pcm.sample_rate as f64 / ENVELOPE_HOP as f64;

        // Autocorrelate over the lag range corresponding to 60..200 BPM
        let min_lag = ((hop_rate * 60.0) / 200.0).floor().max(1.0) as usize;
        let max_lag = ((hop_rate * 60.0) / 60.0).ceil() as usize;
        let max_lag = max_lag.min(envelope.len() / 2);
        if min_lag >= max_lag {
            return Err(KernelError::Extraction("signal too short for tempo".into()));
        }

        let mut best_lag = min_lag;
        let mut best_corr = f64::NEG_INFINITY;
        for lag in min_lag..=max_lag {
            let mut corr = 0.0;
            for i in lag..envelope.len() {
                corr += envelope[i] * envelope[i - lag];
            }
            corr /= (envelope.len() - lag) as f64;
            if corr > best_corr {
                best_corr = corr;
                best_lag = lag;
            }
        }

        let bpm = (hop_rate * 60.0 / best_lag as f64).clamp(60.0, 200.0);
        let beats = (pcm.duration_secs() * bpm / 60.0) as u32;
        Ok(TempoEstimate { bpm, beat_count: beats, confidence: 0.5 })
    }

    fn chroma(&self, pcm: &Pcm) -> Result<[f64; 12], KernelError> {
        // Goertzel energies per pitch class over three octaves around C4
        let window = pcm.samples.len().min(pcm.sample_rate as usize * 4);
        if window == 0 {
            return Err(KernelError::Extraction("no samples for chroma".into()));
        }
        let slice = &pcm.samples[..window];

        let mut bins = [0.0f64; 12];
        for (pc, base_hz) in CHROMATIC_HZ.iter().enumerate() {
            for octave in [0.5, 1.0, 2.0] {
                bins[pc] += goertzel_power(slice, pcm.sample_rate, base_hz * octave);
            }
        }
        let max = bins.iter().cloned().fold(0.0f64, f64::max);
        if max > 0.0 {
            for b in &mut bins {
                *b /= max;
            }
        }
        Ok(bins)
    }

    fn spectral(&self, pcm: &Pcm) -> Result<SpectralStats, KernelError> {
        let w = self.window_stats(pcm, 0, pcm.samples.len())?;
        // Crude mel-free stand-in: cepstral spread approximated by the
        // variance of per-second RMS
        let mut sec_rms = Vec::new();
        let step = pcm.sample_rate as usize;
        let mut start = 0;
        while start < pcm.samples.len() {
            let end = (start + step).min(pcm.samples.len());
            sec_rms.push(rms(&pcm.samples[start..end]));
            start = end;
        }
        let mfcc_variance = variance(&sec_rms);
        Ok(SpectralStats {
            centroid_hz: w.centroid_hz,
            rolloff_hz: w.rolloff_hz,
            bandwidth_hz: w.bandwidth_hz,
            flatness: (w.zero_crossing_rate * 2.0).min(1.0),
            zero_crossing_rate: w.zero_crossing_rate,
            mfcc_variance,
        })
    }

    fn perceptual(&self, pcm: &Pcm) -> Result<PerceptualEstimate, KernelError> {
        let energy = rms(&pcm.samples).clamp(0.0, 1.0);
        let tempo = self.tempo(pcm)?;
        let beat_density = (tempo.beat_count as f64 / pcm.duration_secs().max(1.0) / 4.0).min(1.0);

        // Major-profile correlation stands in for brightness of affect
        let chroma = self.chroma(pcm)?;
        let major = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];
        let corr = pearson(&chroma, &major).unwrap_or(0.0).max(0.0);

        Ok(PerceptualEstimate {
            valence: ((corr + energy) / 2.0).clamp(0.0, 1.0),
            danceability: (beat_density * energy * 4.0).clamp(0.0, 1.0),
        })
    }

    fn window_stats(&self, pcm: &Pcm, start: usize, len: usize) -> Result<WindowStats, KernelError> {
        let end = start
            .checked_add(len)
            .filter(|e| *e <= pcm.samples.len())
            .ok_or_else(|| KernelError::Extraction("window out of range".into()))?;
        let window = &pcm.samples[start..end];
        if window.is_empty() {
            return Err(KernelError::Extraction("empty window".into()));
        }

        let zcr = zero_crossing_rate(window);
        // ZCR-derived brightness proxies: a dense-crossing signal has more
        // high-frequency content
        let centroid_hz = (zcr * pcm.sample_rate as f64 / 4.0).max(1.0);
        Ok(WindowStats {
            rms: rms(window),
            centroid_hz,
            rolloff_hz: centroid_hz * 2.2,
            zero_crossing_rate: zcr,
            bandwidth_hz: centroid_hz * 0.8,
        })
    }
}

/// Parse a minimal RIFF/WAVE container holding 16-bit PCM.
fn decode_wav_pcm16(bytes: &[u8]) -> Result<(Vec<f32>, u32), KernelError> {
    let err = |m: &str| KernelError::Decode(m.to_string());

    if bytes.len() < 44 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(err("not a RIFF/WAVE file"));
    }

    let mut pos = 12;
    let mut format: Option<(u16, u16, u32, u16)> = None; // (tag, channels, rate, bits)
    let mut data: Option<&[u8]> = None;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_end = (pos + 8 + size).min(bytes.len());
        let body = &bytes[pos + 8..body_end];
        match id {
            b"fmt " if body.len() >= 16 => {
                format = Some((
                    u16::from_le_bytes(body[0..2].try_into().unwrap()),
                    u16::from_le_bytes(body[2..4].try_into().unwrap()),
                    u32::from_le_bytes(body[4..8].try_into().unwrap()),
                    u16::from_le_bytes(body[14..16].try_into().unwrap()),
                ));
            }
            b"data" => data = Some(body),
            _ => {}
        }
        // Chunks are word-aligned
        pos = pos + 8 + size + (size & 1);
    }

    let (tag, channels, rate, bits) = format.ok_or_else(|| err("missing fmt chunk"))?;
    let data = data.ok_or_else(|| err("missing data chunk"))?;
    if tag != 1 || bits != 16 {
        return Err(err("only 16-bit PCM WAV is supported"));
    }
    if channels == 0 || rate == 0 {
        return Err(err("malformed fmt chunk"));
    }

    // Downmix to mono
    let channels = channels as usize;
    let frame_count = data.len() / (2 * channels);
    let mut samples = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let mut acc = 0.0f32;
        for ch in 0..channels {
            let off = (frame * channels + ch) * 2;
            let v = i16::from_le_bytes([data[off], data[off + 1]]);
            acc += v as f32 / i16::MAX as f32;
        }
        samples.push(acc / channels as f32);
    }
    Ok((samples, rate))
}

/// Nearest-neighbour resampling; fidelity is not this kernel's concern.
fn resample_nearest(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| samples[((i as f64 * ratio) as usize).min(samples.len() - 1)])
        .collect()
}

fn onset_envelope(samples: &[f32]) -> Vec<f64> {
    let mut envelope = Vec::with_capacity(samples.len() / ENVELOPE_HOP + 1);
    let mut prev = 0.0f64;
    let mut start = 0;
    while start < samples.len() {
        let end = (start + ENVELOPE_HOP).min(samples.len());
        let e = rms(&samples[start..end]);
        // Half-wave rectified energy flux
        envelope.push((e - prev).max(0.0));
        prev = e;
        start = end;
    }
    envelope
}

fn goertzel_power(samples: &[f32], sample_rate: u32, freq_hz: f64) -> f64 {
    let omega = 2.0 * std::f64::consts::PI * freq_hz / sample_rate as f64;
    let coeff = 2.0 * omega.cos();
    let mut s_prev = 0.0f64;
    let mut s_prev2 = 0.0f64;
    for &x in samples {
        let s = x as f64 + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    (s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2) / samples.len().max(1) as f64
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt()
}

fn zero_crossing_rate(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn pearson(a: &[f64; 12], b: &[f64; 12]) -> Option<f64> {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;
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
    (denom > 1e-12).then(|| cov / denom)
}

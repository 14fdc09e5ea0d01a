//! Frequency-domain watermark detector.
//!
//! Looks for deliberately pulsed narrow-band tones in the 30-60 Hz band. The
//! first ~5 seconds of audio are cut into 100 short segments; each segment is
//! Hann-windowed, zero-padded to a power of two, and probed with a direct
//! sine/cosine correlation per integer frequency (no full spectrum needed).
//! A steady tone keeps near-constant magnitude across segments; a pulsed
//! marker produces a high-variance magnitude series at non-trivial average
//! energy, which is what gets ranked.
//!
//! Pure function of the input buffer; candidates are never persisted here.
//! Mapping a candidate code to an owner is an external lookup (see `collab`).

use serde::Serialize;
use std::f64::consts::PI;

use crate::{
    DETECT_MAX_CANDIDATES, DETECT_MAX_FREQ_HZ, DETECT_MIN_FREQ_HZ, DETECT_SEGMENT_COUNT,
    DETECT_SEGMENT_SECS,
};

/// Minimum usable segments; shorter input yields no candidates.
const MIN_SEGMENTS: usize = 8;

/// Detector tunables. Defaults mirror the deployed analysis window.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub segment_secs: f64,
    pub segment_count: usize,
    pub min_freq_hz: u32,
    pub max_freq_hz: u32,
    pub max_candidates: usize,
    /// Variance floor separating pulsed energy from steady background.
    pub min_variance: f64,
    /// Mean-magnitude floor rejecting frequencies with trivial energy.
    pub min_mean_magnitude: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            segment_secs: DETECT_SEGMENT_SECS,
            segment_count: DETECT_SEGMENT_COUNT,
            min_freq_hz: DETECT_MIN_FREQ_HZ,
            max_freq_hz: DETECT_MAX_FREQ_HZ,
            max_candidates: DETECT_MAX_CANDIDATES,
            min_variance: 1e-5,
            min_mean_magnitude: 5e-3,
        }
    }
}

/// A narrow-band frequency suspected of being a deliberate pulsed marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatermarkCandidate {
    pub frequency_hz: u32,
    pub variance: f64,
    pub mean_magnitude: f64,
    pub pulse_rate_hz: f64,
}

/// Detect pulsed watermark tones in a mono sample buffer.
///
/// Returns up to `max_candidates` candidates ordered by variance descending.
/// Inputs too short for a meaningful segment series yield an empty list.
pub fn detect(samples: &[f32], sample_rate: u32, config: &DetectorConfig) -> Vec<WatermarkCandidate> {
    if sample_rate == 0 || config.min_freq_hz > config.max_freq_hz {
        return Vec::new();
    }
    let seg_len = (config.segment_secs * sample_rate as f64).round() as usize;
    if seg_len < 2 {
        return Vec::new();
    }
    let segments = (samples.len() / seg_len).min(config.segment_count);
    if segments < MIN_SEGMENTS {
        return Vec::new();
    }

    let window = hann_window(seg_len);
    let padded_len = seg_len.next_power_of_two();
    let freq_count = (config.max_freq_hz - config.min_freq_hz + 1) as usize;

    // Magnitude time-series per frequency across the segment grid.
    let mut series = vec![vec![0.0f64; segments]; freq_count];
    let mut windowed = vec![0.0f64; seg_len];
    for seg in 0..segments {
        let start = seg * seg_len;
        for (k, w) in window.iter().enumerate() {
            windowed[k] = samples[start + k] as f64 * w;
        }
        for (fi, row) in series.iter_mut().enumerate() {
            let freq = (config.min_freq_hz as usize + fi) as f64;
            row[seg] = single_bin_magnitude(&windowed, freq, sample_rate as f64, padded_len);
        }
    }

    let elapsed_secs = segments as f64 * config.segment_secs;
    let mut stats: Vec<(usize, f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(fi, row)| {
            let mean = row.iter().sum::<f64>() / row.len() as f64;
            let variance =
                row.iter().map(|m| (m - mean) * (m - mean)).sum::<f64>() / row.len() as f64;
            (fi, mean, variance)
        })
        .collect();
    stats.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    stats
        .into_iter()
        .filter(|&(_, mean, variance)| {
            variance >= config.min_variance && mean >= config.min_mean_magnitude
        })
        .take(config.max_candidates)
        .map(|(fi, mean, variance)| WatermarkCandidate {
            frequency_hz: config.min_freq_hz + fi as u32,
            variance,
            mean_magnitude: mean,
            pulse_rate_hz: pulse_rate(&series[fi], elapsed_secs),
        })
        .collect()
}

fn hann_window(len: usize) -> Vec<f64> {
    let denom = (len - 1) as f64;
    (0..len)
        .map(|k| 0.5 * (1.0 - (2.0 * PI * k as f64 / denom).cos()))
        .collect()
}

/// Magnitude of a single frequency via direct sine/cosine summation over the
/// windowed segment. The zero-padded tail contributes nothing to the sums, so
/// only real samples are visited; the pad length enters the normalization.
fn single_bin_magnitude(windowed: &[f64], freq: f64, sample_rate: f64, padded_len: usize) -> f64 {
    let step = 2.0 * PI * freq / sample_rate;
    let mut re = 0.0f64;
    let mut im = 0.0f64;
    for (k, &v) in windowed.iter().enumerate() {
        let phase = step * k as f64;
        re += v * phase.cos();
        im -= v * phase.sin();
    }
    2.0 * (re * re + im * im).sqrt() / padded_len as f64
}

/// Estimate pulse rate by counting rising crossings of the series mean after
/// a light 3-point smoothing pass. One crossing per on/off cycle; magnitude
/// jitter across a hard-gated on-plateau produces spurious local maxima but
/// no extra mean crossings.
fn pulse_rate(series: &[f64], elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || series.len() < 3 {
        return 0.0;
    }
    let mut smooth = Vec::with_capacity(series.len());
    smooth.push(series[0]);
    for k in 1..series.len() - 1 {
        smooth.push((series[k - 1] + series[k] + series[k + 1]) / 3.0);
    }
    smooth.push(series[series.len() - 1]);

    let mean = smooth.iter().sum::<f64>() / smooth.len() as f64;
    let mut rises = 0usize;
    for k in 1..smooth.len() {
        if smooth[k - 1] <= mean && smooth[k] > mean {
            rises += 1;
        }
    }
    rises as f64 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn pulsed_tone(freq: f64, pulse_hz: f64, amplitude: f64, secs: f64) -> Vec<f32> {
        let n = (secs * SR as f64) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / SR as f64;
                // Raised-cosine pulse envelope, phase-shifted so envelope
                // peaks land mid-segment rather than on segment boundaries.
                let envelope = 0.5 - 0.5 * (2.0 * PI * pulse_hz * (t - 0.025)).cos();
                (amplitude * envelope * (2.0 * PI * freq * t).sin()) as f32
            })
            .collect()
    }

    /// Tone gated hard on/off at 50% duty, no ramp.
    fn square_gated_tone(freq: f64, pulse_hz: f64, amplitude: f64, secs: f64) -> Vec<f32> {
        let n = (secs * SR as f64) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / SR as f64;
                let on = (t * pulse_hz).fract() < 0.5;
                if on {
                    (amplitude * (2.0 * PI * freq * t).sin()) as f32
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn steady_tone(freq: f64, amplitude: f64, secs: f64) -> Vec<f32> {
        let n = (secs * SR as f64) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / SR as f64;
                (amplitude * (2.0 * PI * freq * t).sin()) as f32
            })
            .collect()
    }

    #[test]
    fn test_silence_yields_no_candidates() {
        let samples = vec![0.0f32; 5 * SR as usize];
        assert!(detect(&samples, SR, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_short_input_yields_no_candidates() {
        let samples = pulsed_tone(45.0, 2.0, 0.3, 0.2);
        assert!(detect(&samples, SR, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_pulsed_45hz_detected_with_rate() {
        let samples = pulsed_tone(45.0, 2.0, 0.3, 5.0);
        let candidates = detect(&samples, SR, &DetectorConfig::default());
        assert!(!candidates.is_empty());
        let hit = candidates
            .iter()
            .find(|c| c.frequency_hz == 45)
            .unwrap_or_else(|| panic!("45 Hz not in top candidates: {:?}", candidates));
        assert!(
            (hit.pulse_rate_hz - 2.0).abs() <= 0.4,
            "pulse rate {} outside 2.0 +/- 20%",
            hit.pulse_rate_hz
        );
    }

    #[test]
    fn test_square_gated_pulse_rate_within_tolerance() {
        // A hard-edged envelope keeps the magnitude series on a jittery
        // plateau for half of every cycle; the rate estimate must still land
        // within 20% of the true 2 pulses/second.
        let samples = square_gated_tone(45.0, 2.0, 0.3, 5.0);
        let candidates = detect(&samples, SR, &DetectorConfig::default());
        let hit = candidates
            .iter()
            .find(|c| c.frequency_hz == 45)
            .unwrap_or_else(|| panic!("45 Hz not in top candidates: {:?}", candidates));
        assert!(
            (hit.pulse_rate_hz - 2.0).abs() <= 0.4,
            "pulse rate {} outside 2.0 +/- 20%",
            hit.pulse_rate_hz
        );
    }

    #[test]
    fn test_pulsed_outranks_steady_hum() {
        // A quiet steady in-band hum must not displace the pulsed marker;
        // 0.05 s segments cannot resolve 5 Hz, so the hum stays quiet enough
        // that variance ranking still lands on the marker frequency.
        let pulsed = pulsed_tone(45.0, 2.0, 0.3, 5.0);
        let steady = steady_tone(50.0, 0.05, 5.0);
        let mixed: Vec<f32> = pulsed.iter().zip(steady.iter()).map(|(a, b)| a + b).collect();
        let candidates = detect(&mixed, SR, &DetectorConfig::default());
        assert!(!candidates.is_empty());
        assert_eq!(
            candidates[0].frequency_hz, 45,
            "pulsed marker should rank first: {:?}",
            candidates
        );
    }

    #[test]
    fn test_at_most_two_candidates() {
        let a = pulsed_tone(38.0, 2.0, 0.3, 5.0);
        let b = pulsed_tone(52.0, 3.0, 0.3, 5.0);
        let c = pulsed_tone(45.0, 1.0, 0.3, 5.0);
        let mixed: Vec<f32> = a
            .iter()
            .zip(b.iter())
            .zip(c.iter())
            .map(|((x, y), z)| x + y + z)
            .collect();
        let candidates = detect(&mixed, SR, &DetectorConfig::default());
        assert!(candidates.len() <= 2);
    }

    #[test]
    fn test_detection_survives_background_noise() {
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = rand::rngs::StdRng::seed_from_u64(97);
        let normal = Normal::new(0.0f64, 0.02).unwrap();
        let samples: Vec<f32> = pulsed_tone(45.0, 2.0, 0.3, 5.0)
            .into_iter()
            .map(|s| s + normal.sample(&mut rng) as f32)
            .collect();
        let candidates = detect(&samples, SR, &DetectorConfig::default());
        assert!(
            candidates.iter().any(|c| c.frequency_hz == 45),
            "45 Hz lost under noise: {:?}",
            candidates
        );
    }

    #[test]
    fn test_pure_function_repeatable() {
        let samples = pulsed_tone(45.0, 2.0, 0.3, 5.0);
        let cfg = DetectorConfig::default();
        assert_eq!(detect(&samples, SR, &cfg), detect(&samples, SR, &cfg));
    }

    #[test]
    fn test_zero_sample_rate_is_empty() {
        assert!(detect(&[0.0; 1000], 0, &DetectorConfig::default()).is_empty());
    }
}

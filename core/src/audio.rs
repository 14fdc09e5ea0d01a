//! Audio segment/noise codec.
//!
//! Two reversible layers over interleaved PCM:
//!
//! 1. Temporal shuffle: the stream is cut into fixed-duration segments (the
//!    final segment holds the remainder) and emitted in seeded-permutation
//!    order with a silent padding gap between consecutive segments.
//! 2. Masking noise: a buffer regenerated from the noise seed is added to
//!    every sample, index-wrapped, clamped to [-1, 1].
//!
//! The clamp makes the noise layer lossy at the boundary: when
//! `|sample + noise| > 1` at add time the original value cannot be recovered
//! by subtraction. Known limitation of the format, kept for compatibility.

use crate::error::{Result, VeilmarkError};
use crate::key::AudioKeyV1;
use crate::permutation::{Permutation, SeededRng};
use crate::{NOISE_LOW_GAIN, NOISE_MID_GAIN, NOISE_SMOOTHING};

/// Interleaved PCM samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(VeilmarkError::AudioDecodeFailure(
                "sample rate and channel count must be non-zero".into(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(VeilmarkError::AudioDecodeFailure(format!(
                "{} samples do not interleave into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Build the audio key for a clip at generation time. `duration_secs`,
/// `sample_rate` and `channels` are captured from the clip so the unshuffler
/// can re-derive segment geometry without the original media.
pub fn key_for_clip(
    clip: &AudioClip,
    segment_secs: f64,
    padding_secs: f64,
    shuffle_seed: u32,
    noise_seed: u32,
    noise_level: f64,
    author: &str,
) -> AudioKeyV1 {
    AudioKeyV1 {
        segment_secs,
        padding_secs,
        shuffle_seed,
        noise_seed,
        noise_level,
        duration_secs: clip.duration_secs(),
        sample_rate: clip.sample_rate,
        channels: clip.channels,
        author: author.to_owned(),
        created_at: crate::key::now_millis(),
    }
}

fn check_clip_matches_key(clip: &AudioClip, key: &AudioKeyV1) -> Result<()> {
    if clip.sample_rate != key.sample_rate || clip.channels != key.channels {
        return Err(VeilmarkError::UnsupportedMediaType(format!(
            "clip format {} Hz / {} ch does not match key {} Hz / {} ch",
            clip.sample_rate, clip.channels, key.sample_rate, key.channels
        )));
    }
    Ok(())
}

/// Segment geometry shared by shuffle and unshuffle, all in interleaved
/// sample counts (frames x channels).
struct SegmentLayout {
    chunk_len: usize,
    pad_len: usize,
    chunk_count: usize,
    last_len: usize,
}

impl SegmentLayout {
    fn for_total(key: &AudioKeyV1, total_samples: usize) -> Result<Self> {
        let ch = key.channels as usize;
        let seg_frames = (key.segment_secs * key.sample_rate as f64).round() as usize;
        if seg_frames == 0 {
            return Err(VeilmarkError::CorruptOrInvalidKey(
                "segment shorter than one frame".into(),
            ));
        }
        let chunk_len = seg_frames * ch;
        let pad_len = (key.padding_secs * key.sample_rate as f64).round() as usize * ch;
        if total_samples == 0 {
            return Err(VeilmarkError::AudioDecodeFailure("empty audio stream".into()));
        }
        let chunk_count = total_samples.div_ceil(chunk_len);
        let last_len = total_samples - (chunk_count - 1) * chunk_len;
        Ok(Self {
            chunk_len,
            pad_len,
            chunk_count,
            last_len,
        })
    }

    fn chunk_len_of(&self, index: usize) -> usize {
        if index + 1 == self.chunk_count {
            self.last_len
        } else {
            self.chunk_len
        }
    }

    fn shuffled_len(&self) -> usize {
        (self.chunk_count - 1) * (self.chunk_len + self.pad_len) + self.last_len
    }

    fn original_len(&self) -> usize {
        (self.chunk_count - 1) * self.chunk_len + self.last_len
    }
}

/// Emit the clip's segments in permuted order with silent gaps between them.
pub fn shuffle(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    check_clip_matches_key(clip, key)?;
    let layout = SegmentLayout::for_total(key, clip.samples.len())?;
    let perm = Permutation::generate(key.shuffle_seed, layout.chunk_count)?;

    let mut out = Vec::with_capacity(layout.shuffled_len());
    for d in 0..layout.chunk_count {
        let s = perm.source_of(d);
        let start = s * layout.chunk_len;
        out.extend_from_slice(&clip.samples[start..start + layout.chunk_len_of(s)]);
        if d + 1 < layout.chunk_count {
            out.extend(std::iter::repeat(0.0f32).take(layout.pad_len));
        }
    }

    log::debug!(
        "shuffled {} samples into {} segments ({} pad samples between)",
        clip.samples.len(),
        layout.chunk_count,
        layout.pad_len
    );
    AudioClip::new(out, clip.sample_rate, clip.channels)
}

/// Locate every original segment in the shuffled timeline and reassemble the
/// stream in original order, discarding the padding gaps.
pub fn unshuffle(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    check_clip_matches_key(clip, key)?;
    let total_frames = (key.duration_secs * key.sample_rate as f64).round() as usize;
    let total_samples = total_frames * key.channels as usize;
    let layout = SegmentLayout::for_total(key, total_samples)?;
    if clip.samples.len() != layout.shuffled_len() {
        return Err(VeilmarkError::AudioDecodeFailure(format!(
            "shuffled stream is {} samples, key implies {}",
            clip.samples.len(),
            layout.shuffled_len()
        )));
    }

    let perm = Permutation::generate(key.shuffle_seed, layout.chunk_count)?;
    // Slot k in the shuffled stream holds segment perm[k]; precompute where
    // each slot starts (uneven only when the remainder segment lands early).
    let mut slot_offsets = vec![0usize; layout.chunk_count];
    let mut offset = 0usize;
    for (k, slot) in slot_offsets.iter_mut().enumerate() {
        *slot = offset;
        offset += layout.chunk_len_of(perm.source_of(k)) + layout.pad_len;
    }

    let inv = perm.invert();
    let mut out = vec![0.0f32; layout.original_len()];
    for i in 0..layout.chunk_count {
        let slot = inv.source_of(i);
        let len = layout.chunk_len_of(i);
        let src = slot_offsets[slot];
        out[i * layout.chunk_len..i * layout.chunk_len + len]
            .copy_from_slice(&clip.samples[src..src + len]);
    }
    AudioClip::new(out, clip.sample_rate, clip.channels)
}

/// Regenerate the masking-noise buffer for `(seed, level)`.
///
/// Three sub-sequences are derived from the seed (direct, doubled, tripled):
/// a full-rate high-frequency term, a quarter-rate mid term and a
/// sixteenth-rate low term. Samples without a mid contribution instead pick up
/// a one-pole feedback of the previous noise sample, which smooths the
/// spectrum downward. Byte-for-byte reproducible from the inputs.
pub fn noise_buffer(seed: u32, level: f64, len: usize) -> Vec<f32> {
    let mut high = SeededRng::new(seed);
    let mut mid = SeededRng::new(seed.wrapping_mul(2));
    let mut low = SeededRng::new(seed.wrapping_mul(3));

    let mut out = Vec::with_capacity(len);
    let mut prev = 0.0f64;
    for i in 0..len {
        let mut v = (high.next_fraction() * 2.0 - 1.0) * level;
        if i % 4 == 0 {
            v += (mid.next_fraction() * 2.0 - 1.0) * level * NOISE_MID_GAIN;
        } else {
            v += prev * NOISE_SMOOTHING;
        }
        if i % 16 == 0 {
            v += (low.next_fraction() * 2.0 - 1.0) * level * NOISE_LOW_GAIN;
        }
        prev = v;
        out.push(v as f32);
    }
    out
}

fn noise_len_for_key(key: &AudioKeyV1) -> usize {
    // One second of interleaved samples; applied index-wrapped when the
    // stream is longer.
    key.sample_rate as usize * key.channels as usize
}

/// Add the key's masking noise to every sample, clamped to [-1, 1].
pub fn add_noise(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    check_clip_matches_key(clip, key)?;
    if key.noise_level == 0.0 {
        return Ok(clip.clone());
    }
    let noise = noise_buffer(key.noise_seed, key.noise_level, noise_len_for_key(key));
    let samples = clip
        .samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (s as f64 + noise[i % noise.len()] as f64).clamp(-1.0, 1.0) as f32)
        .collect();
    AudioClip::new(samples, clip.sample_rate, clip.channels)
}

/// Subtract the regenerated noise buffer. Exact up to float rounding whenever
/// the add-time clamp did not engage; clipped samples stay lost.
pub fn remove_noise(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    check_clip_matches_key(clip, key)?;
    if key.noise_level == 0.0 {
        return Ok(clip.clone());
    }
    let noise = noise_buffer(key.noise_seed, key.noise_level, noise_len_for_key(key));
    let samples = clip
        .samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (s as f64 - noise[i % noise.len()] as f64).clamp(-1.0, 1.0) as f32)
        .collect();
    AudioClip::new(samples, clip.sample_rate, clip.channels)
}

/// Full forward transform: shuffle, then mask the shuffled stream.
pub fn scramble(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    let shuffled = shuffle(clip, key)?;
    add_noise(&shuffled, key)
}

/// Full inverse transform: unmask, then restore segment order.
pub fn unscramble(clip: &AudioClip, key: &AudioKeyV1) -> Result<AudioClip> {
    let denoised = remove_noise(clip, key)?;
    unshuffle(&denoised, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(segment_secs: f64, padding_secs: f64, clip: &AudioClip) -> AudioKeyV1 {
        key_for_clip(clip, segment_secs, padding_secs, 1, 777, 0.0, "t")
    }

    // Prime period so the value sequence never aligns with a segment length
    // and no two segments hold identical samples.
    fn counting_clip(frames: usize, sample_rate: u32, channels: u16) -> AudioClip {
        let samples = (0..frames * channels as usize)
            .map(|i| (i % 1009) as f32 / 1009.0)
            .collect();
        AudioClip::new(samples, sample_rate, channels).unwrap()
    }

    #[test]
    fn test_clip_rejects_bad_interleave() {
        assert!(AudioClip::new(vec![0.0; 3], 8000, 2).is_err());
        assert!(AudioClip::new(vec![], 0, 1).is_err());
    }

    #[test]
    fn test_shuffle_round_trip_even_segments() {
        let clip = counting_clip(8000, 8000, 1);
        let k = key(0.25, 0.0, &clip);
        let shuffled = shuffle(&clip, &k).unwrap();
        let restored = unshuffle(&shuffled, &k).unwrap();
        assert_eq!(restored, clip);
    }

    #[test]
    fn test_shuffle_round_trip_with_remainder_and_padding() {
        // 1.3 s at 8 kHz, 0.25 s segments: 6 chunks, last one short.
        let clip = counting_clip(10_400, 8000, 1);
        let k = key(0.25, 0.1, &clip);
        let shuffled = shuffle(&clip, &k).unwrap();
        let restored = unshuffle(&shuffled, &k).unwrap();
        assert_eq!(restored, clip);
    }

    #[test]
    fn test_shuffle_round_trip_stereo() {
        let clip = counting_clip(4000, 8000, 2);
        let k = key(0.1, 0.05, &clip);
        let shuffled = shuffle(&clip, &k).unwrap();
        let restored = unshuffle(&shuffled, &k).unwrap();
        assert_eq!(restored, clip);
    }

    #[test]
    fn test_shuffled_timeline_length() {
        // 10 s, 2 s segments, 0.5 s padding: 5 chunks, 4 gaps.
        let clip = counting_clip(80_000, 8000, 1);
        let k = key(2.0, 0.5, &clip);
        let shuffled = shuffle(&clip, &k).unwrap();
        let expected = 80_000 + 4 * 4000;
        assert_eq!(shuffled.samples.len(), expected);
    }

    #[test]
    fn test_silence_round_trips_bit_identical() {
        let clip = AudioClip::new(vec![0.0f32; 80_000], 8000, 1).unwrap();
        let k = key(2.0, 0.5, &clip);
        let restored = unshuffle(&shuffle(&clip, &k).unwrap(), &k).unwrap();
        assert_eq!(restored.samples, clip.samples);
    }

    #[test]
    fn test_shuffle_actually_reorders() {
        let clip = counting_clip(8000, 8000, 1);
        let k = key(0.25, 0.0, &clip);
        let shuffled = shuffle(&clip, &k).unwrap();
        assert_ne!(shuffled.samples, clip.samples);
    }

    #[test]
    fn test_round_trip_odd_length_many_seeds() {
        // 33,331 samples: the short remainder segment lands at a different
        // shuffled slot for every seed and must come back regardless.
        let clip = counting_clip(33_331, 8000, 1);
        for seed in 1..=20u32 {
            let k = key_for_clip(&clip, 0.25, 0.1, seed, 777, 0.0, "t");
            let shuffled = shuffle(&clip, &k).unwrap();
            let restored = unshuffle(&shuffled, &k).unwrap();
            assert_eq!(restored, clip, "round trip broke for seed {}", seed);
        }
    }

    #[test]
    fn test_unshuffle_rejects_wrong_length() {
        let clip = counting_clip(8000, 8000, 1);
        let k = key(0.25, 0.1, &clip);
        let mut shuffled = shuffle(&clip, &k).unwrap();
        shuffled.samples.pop();
        assert!(matches!(
            unshuffle(&shuffled, &k),
            Err(VeilmarkError::AudioDecodeFailure(_))
        ));
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let clip = counting_clip(8000, 8000, 1);
        let mut k = key(0.25, 0.0, &clip);
        k.sample_rate = 44_100;
        assert!(matches!(
            shuffle(&clip, &k),
            Err(VeilmarkError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_noise_buffer_deterministic() {
        let a = noise_buffer(31, 0.05, 4096);
        let b = noise_buffer(31, 0.05, 4096);
        assert_eq!(a, b);
        let c = noise_buffer(32, 0.05, 4096);
        assert_ne!(a, c);
    }

    #[test]
    fn test_noise_round_trip_below_clamp() {
        let clip = AudioClip::new(vec![0.25f32; 16_000], 8000, 1).unwrap();
        let mut k = key(1.0, 0.0, &clip);
        k.noise_level = 0.02;
        let noisy = add_noise(&clip, &k).unwrap();
        assert_ne!(noisy.samples, clip.samples);
        let restored = remove_noise(&noisy, &k).unwrap();
        for (r, o) in restored.samples.iter().zip(clip.samples.iter()) {
            assert!((r - o).abs() < 1e-6, "noise removal drifted: {} vs {}", r, o);
        }
    }

    #[test]
    fn test_noise_clamp_is_lossy_at_boundary() {
        // Samples already at full scale: adding positive noise clips, and the
        // clipped excess cannot come back. Expected format behavior.
        let clip = AudioClip::new(vec![1.0f32; 4096], 8000, 1).unwrap();
        let mut k = key(1.0, 0.0, &clip);
        k.noise_level = 0.1;
        let noisy = add_noise(&clip, &k).unwrap();
        let restored = remove_noise(&noisy, &k).unwrap();
        let worst = restored
            .samples
            .iter()
            .zip(clip.samples.iter())
            .map(|(r, o)| (r - o).abs())
            .fold(0.0f32, f32::max);
        assert!(worst > 1e-3, "expected visible loss past the clamp boundary");
    }

    #[test]
    fn test_full_scramble_round_trip_moderate_noise() {
        // Headroom below full scale keeps the add-time clamp disengaged.
        let samples = (0..20_000).map(|i| (i % 1000) as f32 / 2000.0).collect();
        let clip = AudioClip::new(samples, 8000, 1).unwrap();
        let mut k = key(0.5, 0.25, &clip);
        k.noise_level = 0.01;
        let protected = scramble(&clip, &k).unwrap();
        let restored = unscramble(&protected, &k).unwrap();
        assert_eq!(restored.samples.len(), clip.samples.len());
        for (r, o) in restored.samples.iter().zip(clip.samples.iter()) {
            assert!((r - o).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_stream_rejected() {
        let clip = AudioClip::new(vec![], 8000, 1).unwrap();
        let k = key(1.0, 0.0, &clip);
        assert!(matches!(
            shuffle(&clip, &k),
            Err(VeilmarkError::AudioDecodeFailure(_))
        ));
    }
}

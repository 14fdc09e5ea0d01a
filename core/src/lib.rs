//! Content-protection engine: reversible media scrambling with portable keys,
//! plus detection of pulsed watermark tones for leak attribution.
//!
//! Images and video frames are tile-permuted on a seeded grid; audio is
//! segment-shuffled and masked with regenerable noise. The parameters travel
//! as a single base64 key string, and feeding that string back restores the
//! media. The watermark detector is independent of the scrambler and works on
//! any raw sample buffer.

pub mod audio;
pub mod collab;
pub mod error;
pub mod grid;
pub mod key;
pub mod permutation;
pub mod pipeline;
pub mod watermark;

pub use audio::AudioClip;
pub use error::{Result, VeilmarkError};
pub use grid::{Frame, GridLevel, HeaderText};
pub use key::{AudioKeyV1, ScrambleKey, VisualKeyV1, VisualKeyV2};
pub use permutation::Permutation;
pub use pipeline::ProtectionPipeline;
pub use watermark::{DetectorConfig, WatermarkCandidate};

// Visual configuration
pub const BORDER_MARGIN: u32 = 24; // pixels added on every side of the body
pub const MARKER_ALPHA: u8 = 48; // low-opacity marker blend (0-255)
pub const MAX_FRAME_PIXELS: usize = 64_000_000;

// Audio noise configuration
pub const NOISE_MID_GAIN: f64 = 0.6;
pub const NOISE_LOW_GAIN: f64 = 0.35;
pub const NOISE_SMOOTHING: f64 = 0.45;

// Watermark detector configuration
pub const DETECT_SEGMENT_SECS: f64 = 0.05;
pub const DETECT_SEGMENT_COUNT: usize = 100; // ~5 s analysis window
pub const DETECT_MIN_FREQ_HZ: u32 = 30;
pub const DETECT_MAX_FREQ_HZ: u32 = 60;
pub const DETECT_MAX_CANDIDATES: usize = 2;

// Credit costs per primary operation
pub const CREDIT_COST_IMAGE: u32 = 1;
pub const CREDIT_COST_AUDIO: u32 = 2;
pub const CREDIT_COST_RESTORE: u32 = 1;

//! Protection pipeline: wires the transforms to the collaborator contracts.
//!
//! Credit is debited before a transform and refunded when the transform
//! itself fails. Non-essential collaborator failures (device identity, leak
//! lookup, refund delivery) are logged and never abort the primary operation;
//! a failed key decode or transform is fatal to that call.

use crate::audio::{self, AudioClip};
use crate::collab::{CreditLedger, DebitOutcome, DeviceIdentity, LeakDirectory, LeakRecord};
use crate::error::{Result, VeilmarkError};
use crate::grid::{self, Frame, GridLevel, HeaderText};
use crate::key::{self, ScrambleKey, VisualKeyV1};
use crate::watermark::{self, DetectorConfig, WatermarkCandidate};
use crate::{CREDIT_COST_AUDIO, CREDIT_COST_IMAGE, CREDIT_COST_RESTORE};

/// A scrambled artifact bundled with its portable key string.
#[derive(Debug, Clone)]
pub struct ProtectedImage {
    pub artifact: Frame,
    pub key_text: String,
}

#[derive(Debug, Clone)]
pub struct ProtectedAudio {
    pub clip: AudioClip,
    pub key_text: String,
}

/// Parameters for the audio transform, chosen by the caller.
#[derive(Debug, Clone)]
pub struct AudioProtectParams {
    pub segment_secs: f64,
    pub padding_secs: f64,
    pub shuffle_seed: u32,
    pub noise_seed: u32,
    pub noise_level: f64,
}

pub struct ProtectionPipeline<'a> {
    ledger: &'a dyn CreditLedger,
    device: Option<&'a dyn DeviceIdentity>,
}

impl<'a> ProtectionPipeline<'a> {
    pub fn new(ledger: &'a dyn CreditLedger, device: Option<&'a dyn DeviceIdentity>) -> Self {
        Self { ledger, device }
    }

    /// Operator identity line for the artifact header. A device-identity
    /// failure downgrades to the bare author string with a warning.
    fn identity_line(&self, author: &str) -> String {
        match self.device.map(|d| d.device_hash()) {
            Some(Ok(hash)) => format!("{} #{}", author, hash),
            Some(Err(e)) => {
                log::warn!("device identity unavailable, stamping author only: {}", e);
                author.to_owned()
            }
            None => author.to_owned(),
        }
    }

    fn charge(&self, amount: u32) -> Result<()> {
        match self.ledger.debit(amount)? {
            DebitOutcome::Ok => Ok(()),
            DebitOutcome::Insufficient => Err(VeilmarkError::InsufficientCredit),
        }
    }

    fn refund(&self, amount: u32, reason: &str) {
        if let Err(e) = self.ledger.refund(amount, reason) {
            log::warn!("refund of {} credits failed ({}): {}", amount, reason, e);
        }
    }

    pub fn protect_image(
        &self,
        frame: &Frame,
        level: GridLevel,
        seed: u32,
        author: &str,
        instructions: &str,
    ) -> Result<ProtectedImage> {
        self.charge(CREDIT_COST_IMAGE)?;
        let (rows, cols) = level.dims();
        let key = ScrambleKey::VisualV1(VisualKeyV1 {
            seed,
            rows,
            cols,
            author: author.to_owned(),
            created_at: key::now_millis(),
        });
        let identity = self.identity_line(author);
        let header = HeaderText {
            marker: Some(identity.clone()),
            identity,
            instructions: instructions.to_owned(),
        };
        let artifact = match grid::scramble_frame(frame, &key, &header) {
            Ok(f) => f,
            Err(e) => {
                self.refund(CREDIT_COST_IMAGE, "image scramble failed");
                return Err(e);
            }
        };
        Ok(ProtectedImage {
            artifact,
            key_text: key::encode(&key)?,
        })
    }

    pub fn protect_audio(
        &self,
        clip: &AudioClip,
        params: &AudioProtectParams,
        author: &str,
    ) -> Result<ProtectedAudio> {
        self.charge(CREDIT_COST_AUDIO)?;
        let key_inner = audio::key_for_clip(
            clip,
            params.segment_secs,
            params.padding_secs,
            params.shuffle_seed,
            params.noise_seed,
            params.noise_level,
            &self.identity_line(author),
        );
        let protected = match audio::scramble(clip, &key_inner) {
            Ok(c) => c,
            Err(e) => {
                self.refund(CREDIT_COST_AUDIO, "audio scramble failed");
                return Err(e);
            }
        };
        Ok(ProtectedAudio {
            clip: protected,
            key_text: key::encode(&ScrambleKey::AudioV1(key_inner))?,
        })
    }

    /// Decode the key and restore the original frame. The decode validates
    /// fully before any derived bytes are trusted; its failure is fatal here.
    pub fn restore_image(&self, artifact: &Frame, key_text: &str) -> Result<Frame> {
        let key = key::decode(key_text)?;
        self.charge(CREDIT_COST_RESTORE)?;
        match grid::unscramble_frame(artifact, &key) {
            Ok(f) => Ok(f),
            Err(e) => {
                self.refund(CREDIT_COST_RESTORE, "image unscramble failed");
                Err(e)
            }
        }
    }

    pub fn restore_audio(&self, clip: &AudioClip, key_text: &str) -> Result<AudioClip> {
        let key = match key::decode(key_text)? {
            ScrambleKey::AudioV1(k) => k,
            _ => {
                return Err(VeilmarkError::UnsupportedMediaType(
                    "visual key supplied for an audio restore".into(),
                ))
            }
        };
        self.charge(CREDIT_COST_RESTORE)?;
        match audio::unscramble(clip, &key) {
            Ok(c) => Ok(c),
            Err(e) => {
                self.refund(CREDIT_COST_RESTORE, "audio unscramble failed");
                Err(e)
            }
        }
    }

    /// Run the detector and resolve candidates against the leak database.
    /// A lookup failure is logged; the candidate is still reported unmatched.
    pub fn attribute_leak(
        &self,
        samples: &[f32],
        sample_rate: u32,
        directory: &dyn LeakDirectory,
    ) -> Vec<(WatermarkCandidate, Option<LeakRecord>)> {
        let candidates = watermark::detect(samples, sample_rate, &DetectorConfig::default());
        candidates
            .into_iter()
            .map(|c| {
                let record = match directory.lookup(c.frequency_hz) {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("leak lookup for {} Hz failed: {}", c.frequency_hz, e);
                        None
                    }
                };
                (c, record)
            })
            .collect()
    }
}

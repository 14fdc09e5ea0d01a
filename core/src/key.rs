//! Portable key codec.
//!
//! A scramble key travels as a single base64 text blob wrapping a compact JSON
//! body. Audio keys are additionally XORed against a repeating static
//! passphrase before the base64 step. The XOR layer is obfuscation only: the
//! passphrase is fixed and shared by every client, so it provides no
//! confidentiality. It is reproduced byte-exactly here because key-format
//! compatibility depends on it; do not replace it with real encryption without
//! introducing a new key version.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VeilmarkError};
use crate::permutation::Permutation;

/// Static passphrase for the audio-key XOR layer. Shared across all clients;
/// changing it invalidates every audio key already issued.
pub const KEY_XOR_PASSPHRASE: &[u8] = b"veilmark.keyline.v1";

/// Visual key, version 1: permutation regenerated from the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualKeyV1 {
    pub seed: u32,
    pub rows: u32,
    pub cols: u32,
    pub author: String,
    pub created_at: u64,
}

/// Visual key, version 2: carries the explicit permutation, stored 1-based on
/// the wire for compatibility with keys issued by older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualKeyV2 {
    pub seed: u32,
    pub rows: u32,
    pub cols: u32,
    pub perm1based: Vec<u32>,
    pub author: String,
    pub created_at: u64,
}

/// Audio key, version 1: segment shuffle plus masking-noise parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioKeyV1 {
    pub segment_secs: f64,
    pub padding_secs: f64,
    pub shuffle_seed: u32,
    pub noise_seed: u32,
    pub noise_level: f64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub author: String,
    pub created_at: u64,
}

/// Versioned scramble key. Decoding dispatches on the `kind` and `version`
/// fields and rejects anything unrecognized; no best-effort field access.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrambleKey {
    VisualV1(VisualKeyV1),
    VisualV2(VisualKeyV2),
    AudioV1(AudioKeyV1),
}

impl VisualKeyV1 {
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn permutation(&self) -> Result<Permutation> {
        Permutation::generate(self.seed, self.cell_count())
    }
}

impl VisualKeyV2 {
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Materialize the embedded 1-based permutation, re-running the bijection
    /// check. Length is validated against the grid at decode time as well.
    pub fn permutation(&self) -> Result<Permutation> {
        let cells = self.cell_count();
        if self.perm1based.len() != cells {
            return Err(VeilmarkError::PermutationLengthMismatch {
                expected: cells,
                actual: self.perm1based.len(),
            });
        }
        let zero_based: Vec<u32> = self
            .perm1based
            .iter()
            .map(|&v| {
                v.checked_sub(1).ok_or_else(|| {
                    VeilmarkError::CorruptOrInvalidKey(
                        "permutation entries are 1-based; found 0".into(),
                    )
                })
            })
            .collect::<Result<_>>()?;
        Permutation::from_raw(zero_based)
    }
}

impl ScrambleKey {
    fn kind(&self) -> &'static str {
        match self {
            ScrambleKey::VisualV1(_) | ScrambleKey::VisualV2(_) => "visual",
            ScrambleKey::AudioV1(_) => "audio",
        }
    }

    fn version(&self) -> u32 {
        match self {
            ScrambleKey::VisualV1(_) => 1,
            ScrambleKey::VisualV2(_) => 2,
            ScrambleKey::AudioV1(_) => 1,
        }
    }

    fn body(&self) -> Result<serde_json::Value> {
        let mut value = match self {
            ScrambleKey::VisualV1(k) => serde_json::to_value(k),
            ScrambleKey::VisualV2(k) => serde_json::to_value(k),
            ScrambleKey::AudioV1(k) => serde_json::to_value(k),
        }
        .map_err(|e| VeilmarkError::CorruptOrInvalidKey(e.to_string()))?;

        let obj = value
            .as_object_mut()
            .ok_or_else(|| VeilmarkError::CorruptOrInvalidKey("key body is not an object".into()))?;
        obj.insert("kind".into(), self.kind().into());
        obj.insert("version".into(), self.version().into());
        Ok(value)
    }
}

fn xor_with_passphrase(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= KEY_XOR_PASSPHRASE[i % KEY_XOR_PASSPHRASE.len()];
    }
}

/// Serialize a key to its portable string form.
pub fn encode(key: &ScrambleKey) -> Result<String> {
    let body = key.body()?;
    let mut bytes =
        serde_json::to_vec(&body).map_err(|e| VeilmarkError::CorruptOrInvalidKey(e.to_string()))?;
    if matches!(key, ScrambleKey::AudioV1(_)) {
        xor_with_passphrase(&mut bytes);
    }
    Ok(BASE64.encode(bytes))
}

/// Decode and fully validate a portable key string.
///
/// Validation completes before any field is handed to a transform: required
/// fields present, version recognized, embedded permutation a true bijection,
/// durations and rates sane. Anything else is `CorruptOrInvalidKey`.
pub fn decode(text: &str) -> Result<ScrambleKey> {
    let raw = BASE64
        .decode(text.trim())
        .map_err(|e| VeilmarkError::CorruptOrInvalidKey(format!("base64: {}", e)))?;

    // Visual keys are plain JSON; audio keys only parse after the XOR layer
    // is removed. Try plain first, then the obfuscated path.
    let value: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(_) => {
            let mut deobfuscated = raw;
            xor_with_passphrase(&mut deobfuscated);
            serde_json::from_slice(&deobfuscated).map_err(|_| {
                VeilmarkError::CorruptOrInvalidKey("not a recognizable key payload".into())
            })?
        }
    };

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| VeilmarkError::CorruptOrInvalidKey("missing kind".into()))?
        .to_owned();
    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| VeilmarkError::CorruptOrInvalidKey("missing version".into()))?;

    let key = match (kind.as_str(), version) {
        ("visual", 1) => ScrambleKey::VisualV1(parse_body(value)?),
        ("visual", 2) => ScrambleKey::VisualV2(parse_body(value)?),
        ("audio", 1) => ScrambleKey::AudioV1(parse_body(value)?),
        _ => {
            return Err(VeilmarkError::CorruptOrInvalidKey(format!(
                "unrecognized key: kind={} version={}",
                kind, version
            )))
        }
    };

    validate(&key)?;
    Ok(key)
}

fn parse_body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| VeilmarkError::CorruptOrInvalidKey(e.to_string()))
}

fn validate(key: &ScrambleKey) -> Result<()> {
    match key {
        ScrambleKey::VisualV1(k) => {
            if k.rows == 0 || k.cols == 0 {
                return Err(VeilmarkError::CorruptOrInvalidKey("empty grid".into()));
            }
        }
        ScrambleKey::VisualV2(k) => {
            if k.rows == 0 || k.cols == 0 {
                return Err(VeilmarkError::CorruptOrInvalidKey("empty grid".into()));
            }
            // Bijection re-check over the declared grid size.
            k.permutation()?;
        }
        ScrambleKey::AudioV1(k) => {
            if !(k.segment_secs.is_finite() && k.segment_secs > 0.0) {
                return Err(VeilmarkError::CorruptOrInvalidKey(
                    "segment_secs must be positive".into(),
                ));
            }
            if !(k.padding_secs.is_finite() && k.padding_secs >= 0.0) {
                return Err(VeilmarkError::CorruptOrInvalidKey(
                    "padding_secs must be non-negative".into(),
                ));
            }
            if !(k.noise_level.is_finite() && k.noise_level >= 0.0) {
                return Err(VeilmarkError::CorruptOrInvalidKey(
                    "noise_level must be non-negative".into(),
                ));
            }
            if !(k.duration_secs.is_finite() && k.duration_secs >= 0.0) {
                return Err(VeilmarkError::CorruptOrInvalidKey(
                    "duration_secs must be non-negative".into(),
                ));
            }
            if k.sample_rate == 0 || k.channels == 0 {
                return Err(VeilmarkError::CorruptOrInvalidKey(
                    "sample_rate and channels must be non-zero".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Milliseconds since the unix epoch, for `created_at` stamping. The only
/// place the codec touches wall-clock time; transforms never do.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visual_v1() -> ScrambleKey {
        ScrambleKey::VisualV1(VisualKeyV1 {
            seed: 42,
            rows: 8,
            cols: 8,
            author: "studio-17".into(),
            created_at: 1_700_000_000_000,
        })
    }

    fn audio_v1() -> ScrambleKey {
        ScrambleKey::AudioV1(AudioKeyV1 {
            segment_secs: 2.0,
            padding_secs: 0.5,
            shuffle_seed: 77,
            noise_seed: 31,
            noise_level: 0.02,
            duration_secs: 10.0,
            sample_rate: 44_100,
            channels: 2,
            author: "studio-17".into(),
            created_at: 1_700_000_000_000,
        })
    }

    #[test]
    fn test_visual_v1_round_trip() {
        let key = visual_v1();
        let encoded = encode(&key).unwrap();
        assert_eq!(decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_visual_v2_round_trip_explicit_perm() {
        // version 2, seed 999, 4x4 grid, explicit 1-based permutation.
        let perm = Permutation::generate(999, 16).unwrap();
        let perm1based: Vec<u32> = perm.as_slice().iter().map(|&v| v + 1).collect();
        let key = ScrambleKey::VisualV2(VisualKeyV2 {
            seed: 999,
            rows: 4,
            cols: 4,
            perm1based,
            author: "studio-17".into(),
            created_at: 1_700_000_000_000,
        });
        let encoded = encode(&key).unwrap();
        assert_eq!(decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_audio_round_trip() {
        let key = audio_v1();
        let encoded = encode(&key).unwrap();
        assert_eq!(decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_audio_key_is_obfuscated() {
        let encoded = encode(&audio_v1()).unwrap();
        let raw = BASE64.decode(encoded).unwrap();
        // The pre-base64 bytes must not be readable JSON.
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());
    }

    #[test]
    fn test_visual_key_is_plain_json_under_base64() {
        let encoded = encode(&visual_v1()).unwrap();
        let raw = BASE64.decode(encoded).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not even base64!!"),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
        assert!(matches!(
            decode(&BASE64.encode(b"hello world")),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let blob = BASE64.encode(br#"{"kind":"visual","version":9,"seed":1}"#);
        assert!(matches!(
            decode(&blob),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let blob = BASE64.encode(br#"{"kind":"visual","version":1,"seed":1}"#);
        assert!(matches!(
            decode(&blob),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_bijective_perm() {
        let blob = BASE64.encode(
            br#"{"kind":"visual","version":2,"seed":1,"rows":2,"cols":2,
                 "perm1based":[1,1,2,3],"author":"a","created_at":0}"#
                .as_slice(),
        );
        assert!(matches!(
            decode(&blob),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_perm_length_mismatch() {
        let blob = BASE64.encode(
            br#"{"kind":"visual","version":2,"seed":1,"rows":2,"cols":2,
                 "perm1based":[1,2,3],"author":"a","created_at":0}"#
                .as_slice(),
        );
        assert!(matches!(
            decode(&blob),
            Err(VeilmarkError::PermutationLengthMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_decode_rejects_zero_segment() {
        let key = match audio_v1() {
            ScrambleKey::AudioV1(mut k) => {
                k.segment_secs = 0.0;
                ScrambleKey::AudioV1(k)
            }
            _ => unreachable!(),
        };
        let encoded = encode(&key).unwrap();
        assert!(matches!(
            decode(&encoded),
            Err(VeilmarkError::CorruptOrInvalidKey(_))
        ));
    }

    #[test]
    fn test_whitespace_tolerated_around_key() {
        let key = visual_v1();
        let encoded = format!("  {}\n", encode(&key).unwrap());
        assert_eq!(decode(&encoded).unwrap(), key);
    }
}

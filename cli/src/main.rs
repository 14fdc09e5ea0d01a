use clap::{Parser, Subcommand};
use hound::WavSpec;
use std::fs::File;
use std::path::{Path, PathBuf};
use veilmark_core::{
    audio, grid, key, watermark::{detect, DetectorConfig}, AudioClip, Frame, GridLevel,
    HeaderText, ScrambleKey, VisualKeyV1,
};

#[derive(Parser)]
#[command(name = "veilmark")]
#[command(about = "Reversible media scrambling with portable keys and watermark detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scramble a PNG image and emit the unlock key
    ScrambleImage {
        /// Input PNG file
        #[arg(value_name = "INPUT.PNG")]
        input: PathBuf,

        /// Output PNG file
        #[arg(value_name = "OUTPUT.PNG")]
        output: PathBuf,

        /// File the key string is written to
        #[arg(long, value_name = "KEY.TXT")]
        key_out: PathBuf,

        /// Permutation seed (random if omitted)
        #[arg(long)]
        seed: Option<u32>,

        /// Grid level: coarse (6x6), standard (8x8) or fine (10x10)
        #[arg(long, default_value = "standard")]
        level: GridLevel,

        /// Operator identity stamped into the border
        #[arg(long, default_value = "veilmark")]
        author: String,

        /// Instruction line stamped into the border
        #[arg(long, default_value = "unlock with your veilmark key")]
        instructions: String,

        /// Bake a low-opacity marker into the body (prevents an exact round trip)
        #[arg(long)]
        marker: bool,
    },

    /// Restore a scrambled PNG image using its key
    UnscrambleImage {
        /// Input PNG file (scrambled artifact)
        #[arg(value_name = "INPUT.PNG")]
        input: PathBuf,

        /// Output PNG file
        #[arg(value_name = "OUTPUT.PNG")]
        output: PathBuf,

        /// File holding the key string
        #[arg(long, value_name = "KEY.TXT")]
        key: PathBuf,
    },

    /// Shuffle and noise-mask a WAV file and emit the unlock key
    ScrambleAudio {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// File the key string is written to
        #[arg(long, value_name = "KEY.TXT")]
        key_out: PathBuf,

        /// Segment duration in seconds
        #[arg(long, default_value = "2.0")]
        segment_secs: f64,

        /// Silent gap between emitted segments in seconds
        #[arg(long, default_value = "0.5")]
        padding_secs: f64,

        /// Masking noise level (0 disables the noise layer)
        #[arg(long, default_value = "0.02")]
        noise_level: f64,

        /// Shuffle seed (random if omitted)
        #[arg(long)]
        seed: Option<u32>,

        /// Operator identity recorded in the key
        #[arg(long, default_value = "veilmark")]
        author: String,
    },

    /// Restore a scrambled WAV file using its key
    UnscrambleAudio {
        /// Input WAV file (scrambled artifact)
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// File holding the key string
        #[arg(long, value_name = "KEY.TXT")]
        key: PathBuf,
    },

    /// Scan a WAV file for pulsed watermark tones (30-60 Hz)
    DetectWatermark {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,
    },

    /// Decode a key file and pretty-print its fields
    InspectKey {
        /// File holding the key string
        #[arg(value_name = "KEY.TXT")]
        key: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::ScrambleImage {
            input,
            output,
            key_out,
            seed,
            level,
            author,
            instructions,
            marker,
        } => scramble_image_command(
            &input,
            &output,
            &key_out,
            seed,
            level,
            &author,
            &instructions,
            marker,
        )?,
        Commands::UnscrambleImage { input, output, key } => {
            unscramble_image_command(&input, &output, &key)?
        }
        Commands::ScrambleAudio {
            input,
            output,
            key_out,
            segment_secs,
            padding_secs,
            noise_level,
            seed,
            author,
        } => scramble_audio_command(
            &input,
            &output,
            &key_out,
            segment_secs,
            padding_secs,
            noise_level,
            seed,
            &author,
        )?,
        Commands::UnscrambleAudio { input, output, key } => {
            unscramble_audio_command(&input, &output, &key)?
        }
        Commands::DetectWatermark { input } => detect_watermark_command(&input)?,
        Commands::InspectKey { key } => inspect_key_command(&key)?,
    }

    Ok(())
}

/// Seed picked from OS entropy at generation time only; every later step is
/// driven purely by the recorded seed.
fn fresh_seed() -> u32 {
    rand::random()
}

#[allow(clippy::too_many_arguments)]
fn scramble_image_command(
    input_path: &Path,
    output_path: &Path,
    key_out_path: &Path,
    seed: Option<u32>,
    level: GridLevel,
    author: &str,
    instructions: &str,
    marker: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let frame = read_png(input_path)?;
    println!(
        "Read {}x{} image from {}",
        frame.width(),
        frame.height(),
        input_path.display()
    );

    let seed = match seed {
        Some(s) => s,
        None => fresh_seed(),
    };
    let (rows, cols) = level.dims();
    let key_obj = ScrambleKey::VisualV1(VisualKeyV1 {
        seed,
        rows,
        cols,
        author: author.to_owned(),
        created_at: key::now_millis(),
    });

    let header = HeaderText {
        identity: author.to_owned(),
        instructions: instructions.to_owned(),
        marker: marker.then(|| author.to_owned()),
    };
    let scrambled = grid::scramble_frame(&frame, &key_obj, &header)?;
    write_png(output_path, &scrambled)?;
    println!(
        "Scrambled with a {}x{} grid (seed {}) to {}",
        rows,
        cols,
        seed,
        output_path.display()
    );

    std::fs::write(key_out_path, key::encode(&key_obj)?)?;
    println!("Key written to {}", key_out_path.display());
    Ok(())
}

fn unscramble_image_command(
    input_path: &Path,
    output_path: &Path,
    key_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let key_text = std::fs::read_to_string(key_path)?;
    let key_obj = key::decode(&key_text)?;

    let artifact = read_png(input_path)?;
    let restored = grid::unscramble_frame(&artifact, &key_obj)?;
    write_png(output_path, &restored)?;
    println!(
        "Restored {}x{} image to {}",
        restored.width(),
        restored.height(),
        output_path.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn scramble_audio_command(
    input_path: &Path,
    output_path: &Path,
    key_out_path: &Path,
    segment_secs: f64,
    padding_secs: f64,
    noise_level: f64,
    seed: Option<u32>,
    author: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let clip = read_wav(input_path)?;
    println!(
        "Read {:.2} s of audio ({} Hz, {} ch) from {}",
        clip.duration_secs(),
        clip.sample_rate,
        clip.channels,
        input_path.display()
    );

    let shuffle_seed = match seed {
        Some(s) => s,
        None => fresh_seed(),
    };
    let noise_seed = fresh_seed();
    let key_inner = audio::key_for_clip(
        &clip,
        segment_secs,
        padding_secs,
        shuffle_seed,
        noise_seed,
        noise_level,
        author,
    );

    let protected = audio::scramble(&clip, &key_inner)?;
    write_wav(output_path, &protected)?;
    println!(
        "Scrambled into {:.2} s of audio at {}",
        protected.duration_secs(),
        output_path.display()
    );

    std::fs::write(key_out_path, key::encode(&ScrambleKey::AudioV1(key_inner))?)?;
    println!("Key written to {}", key_out_path.display());
    Ok(())
}

fn unscramble_audio_command(
    input_path: &Path,
    output_path: &Path,
    key_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let key_text = std::fs::read_to_string(key_path)?;
    let key_inner = match key::decode(&key_text)? {
        ScrambleKey::AudioV1(k) => k,
        _ => return Err("key file does not hold an audio key".into()),
    };

    let clip = read_wav(input_path)?;
    let restored = audio::unscramble(&clip, &key_inner)?;
    write_wav(output_path, &restored)?;
    println!(
        "Restored {:.2} s of audio to {}",
        restored.duration_secs(),
        output_path.display()
    );
    Ok(())
}

fn detect_watermark_command(input_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let clip = read_wav(input_path)?;
    let mono = downmix(&clip);
    let candidates = detect(&mono, clip.sample_rate, &DetectorConfig::default());

    if candidates.is_empty() {
        println!("No pulsed watermark tones detected");
        return Ok(());
    }
    for (rank, c) in candidates.iter().enumerate() {
        println!(
            "#{} {} Hz  variance {:.6}  mean magnitude {:.6}  ~{:.2} pulses/s",
            rank + 1,
            c.frequency_hz,
            c.variance,
            c.mean_magnitude,
            c.pulse_rate_hz
        );
    }
    Ok(())
}

fn inspect_key_command(key_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let key_text = std::fs::read_to_string(key_path)?;
    let key_obj = key::decode(&key_text)?;
    let pretty = match &key_obj {
        ScrambleKey::VisualV1(k) => serde_json::to_string_pretty(k)?,
        ScrambleKey::VisualV2(k) => serde_json::to_string_pretty(k)?,
        ScrambleKey::AudioV1(k) => serde_json::to_string_pretty(k)?,
    };
    let kind = match &key_obj {
        ScrambleKey::VisualV1(_) => "visual v1",
        ScrambleKey::VisualV2(_) => "visual v2",
        ScrambleKey::AudioV1(_) => "audio v1",
    };
    println!("{} key:\n{}", kind, pretty);
    Ok(())
}

fn read_png(path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
    let img = image::open(path)?.into_rgba8();
    let (w, h) = img.dimensions();
    Ok(Frame::from_rgba(w, h, img.into_raw())?)
}

fn write_png(path: &Path, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
    let img: image::RgbaImage =
        image::ImageBuffer::from_raw(frame.width(), frame.height(), frame.rgba().to_vec())
            .ok_or("frame buffer does not match its dimensions")?;
    img.save(path)?;
    Ok(())
}

fn read_wav(path: &Path) -> Result<AudioClip, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    println!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    // Accept 16-bit int and 32-bit float PCM.
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let int_samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            int_samples?
                .into_iter()
                .map(|s| s as f32 / 32768.0)
                .collect()
        }
        (hound::SampleFormat::Float, 32) => {
            let float_samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            float_samples?
        }
        (_, bits) => {
            return Err(veilmark_core::VeilmarkError::AudioDecodeFailure(format!(
                "unsupported WAV bit depth: {}",
                bits
            ))
            .into());
        }
    };

    Ok(AudioClip::new(samples, spec.sample_rate, spec.channels)?)
}

fn write_wav(path: &Path, clip: &AudioClip) -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for &sample in &clip.samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn downmix(clip: &AudioClip) -> Vec<f32> {
    if clip.channels == 1 {
        return clip.samples.clone();
    }
    let ch = clip.channels as usize;
    clip.samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

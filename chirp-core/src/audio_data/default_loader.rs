use crate::{
    audio_data::{BankLoader, ConvertToMono, DecodedAudio, LoadOptions, SoundAsset},
    error::{ChirpError, Result},
};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// File extensions picked up when a directory is loaded as a bank.
pub const BANK_EXTENSIONS: &[&str] = &["wav", "wave", "ogg", "oga", "flac"];

/// Default bank loader built on the Symphonia decoder library.
///
/// A path to an audio file loads as a one-sound bank named after the file stem.
/// A path to a directory loads every file with a [`BANK_EXTENSIONS`] extension,
/// sorted by file name, so sound indices are stable across runs.
///
/// # Examples
///
/// ```ignore
/// use chirp_core::audio_data::{BankLoader, LoadOptions, SymphoniaBankLoader};
///
/// let sounds = SymphoniaBankLoader.load("assets/sfx".as_ref(), &LoadOptions::default())?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaBankLoader;

impl BankLoader for SymphoniaBankLoader {
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Vec<SoundAsset>> {
        let files = if path.is_dir() {
            bank_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        if files.is_empty() {
            return Err(ChirpError::AudioLoading(format!(
                "No audio files found in {}",
                path.display()
            )));
        }

        files
            .iter()
            .map(|file| {
                let name = file
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default()
                    .to_string();
                let audio = prepare(decode_file(file)?, options)?;
                log::debug!(
                    "Loaded sound '{}' ({} frames, {} ch, {} Hz)",
                    name,
                    audio.total_frames(),
                    audio.channels(),
                    audio.sample_rate()
                );
                Ok(SoundAsset::new(name, audio))
            })
            .collect()
    }
}

fn bank_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| BANK_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && supported {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Applies mono conversion and resampling from `options`.
fn prepare(audio: DecodedAudio, options: &LoadOptions) -> Result<DecodedAudio> {
    let audio = match options.convert_to_mono {
        ConvertToMono::Original => audio,
        ConvertToMono::ForceMono => audio.to_mono(),
    };
    match options.target_sample_rate {
        Some(rate) => audio.resample(rate),
        None => Ok(audio),
    }
}

/// Decodes a whole file into interleaved `f32` samples.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ChirpError::AudioLoading(format!("Unrecognized audio format: {:?}", e)))?;

    let mut format = detected.format;

    let track = format
        .default_track()
        .ok_or_else(|| ChirpError::AudioLoading("No default audio track found".to_string()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ChirpError::AudioLoading("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| ChirpError::AudioLoading("Channel count not found".to_string()))?
        .count() as u16;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ChirpError::Decode(format!("Failed to create decoder: {:?}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(ChirpError::Decode(format!("Error reading packet: {:?}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break,
            Err(Error::DecodeError(_)) => continue, // recoverable corruption
            Err(e) => {
                return Err(ChirpError::Decode(format!("Error decoding packet: {:?}", e)));
            }
        };

        let spec = *decoded.spec();
        let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);
        samples.extend_from_slice(tmp.samples());
    }

    DecodedAudio::new(samples, sample_rate, channels)
}

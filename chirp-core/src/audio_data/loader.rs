use crate::audio_data::{DecodedAudio, LoadOptions};
use crate::looping::LoopRegion;
use crate::error::Result;
use std::path::Path;

/// One decoded sound, ready to be packed into a [`Bank`](crate::bank::Bank).
#[derive(Debug, Clone)]
pub struct SoundAsset {
    pub name: String,
    pub audio: DecodedAudio,
    /// Default volume applied when a play request does not override it
    pub volume: f32,
    /// Default pan applied when a play request does not override it
    pub pan: f32,
    pub looping: Option<LoopRegion>,
}

impl SoundAsset {
    pub fn new(name: impl Into<String>, audio: DecodedAudio) -> Self {
        Self {
            name: name.into(),
            audio,
            volume: 1.0,
            pan: 0.0,
            looping: None,
        }
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn looping(mut self, region: LoopRegion) -> Self {
        self.looping = Some(region);
        self
    }
}

/// Trait for turning a bank path into decoded sounds.
///
/// The bank packaging format is up to the implementation. chirp ships
/// [`SymphoniaBankLoader`](crate::audio_data::SymphoniaBankLoader), which
/// treats a single audio file as a one-sound bank and a directory as a bank of
/// every audio file inside it.
///
/// # Example
///
/// ```ignore
/// use chirp_core::audio_data::{BankLoader, LoadOptions, SoundAsset};
/// use chirp_core::error::Result;
/// use std::path::Path;
///
/// struct MyPackLoader;
///
/// impl BankLoader for MyPackLoader {
///     fn load(&self, path: &Path, options: &LoadOptions) -> Result<Vec<SoundAsset>> {
///         // Your unpacking logic here
///         todo!()
///     }
/// }
/// ```
pub trait BankLoader: Send + Sync {
    /// Loads every sound in the bank at `path`, in bank index order.
    ///
    /// # Errors
    ///
    /// Returns a `ChirpError` if the bank cannot be read or a sound cannot be
    /// decoded.
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Vec<SoundAsset>>;
}

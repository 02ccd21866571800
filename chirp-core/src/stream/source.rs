use crate::error::Result;
use std::fmt;

/// Codec family of a streamed asset, used to pick a decoder variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Pcm,
    Adpcm,
    Vorbis,
    Flac,
    Mp3,
    Aac,
    Unknown,
}

impl Codec {
    /// Best guess from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" | "aif" | "aiff" | "raw" => Self::Pcm,
            "ogg" | "oga" => Self::Vorbis,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "m4a" | "aac" | "mp4" => Self::Aac,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pcm => "PCM",
            Self::Adpcm => "ADPCM",
            Self::Vorbis => "Ogg Vorbis",
            Self::Flac => "FLAC",
            Self::Mp3 => "MP3",
            Self::Aac => "AAC",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Shape of the audio a [`StreamSource`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Length in frames, if the container reports it
    pub total_frames: Option<u64>,
    pub codec: Codec,
}

/// Incremental producer of interleaved `f32` audio, read on the refill side
/// of a stream.
///
/// `read` may block on I/O; it is never called from the tick. A source that
/// has nothing available right now returns an `Io` error of kind
/// `WouldBlock`, which the stream treats as a stall and retries at the next
/// refill. Any other error fails the stream.
pub trait StreamSource: Send {
    fn format(&self) -> StreamFormat;

    /// Fills `out` with whole frames and returns the number of frames written.
    /// `Ok(0)` means end of stream.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;

    /// Repositions the next `read` at `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;
}

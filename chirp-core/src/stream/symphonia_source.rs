use crate::error::{ChirpError, Result};
use crate::stream::{Codec, StreamFormat, StreamSource};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{
            CODEC_TYPE_AAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS, CodecParameters,
            Decoder as SymphoniaDecoder, DecoderOptions,
        },
        errors::Error,
        formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Streams a file through Symphonia, one packet at a time.
pub struct SymphoniaStreamSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    format: StreamFormat,
    convert: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to drop after an inexact seek
    skip_frames: u64,
    finished: bool,
}

impl SymphoniaStreamSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ChirpError::StreamIo(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let detected = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| ChirpError::Decode(format!("Unrecognized audio format: {:?}", e)))?;

        let reader = detected.format;
        let track = reader
            .default_track()
            .ok_or_else(|| ChirpError::Decode("No default audio track found".to_string()))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| ChirpError::Decode("Sample rate not found".to_string()))?;
        let channels = params
            .channels
            .ok_or_else(|| ChirpError::Decode("Channel count not found".to_string()))?
            .count() as u16;

        let format = StreamFormat {
            sample_rate,
            channels,
            total_frames: params.n_frames,
            codec: codec_of(params),
        };

        let decoder = get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| ChirpError::Decode(format!("Failed to create decoder: {:?}", e)))?;

        log::debug!(
            "Opened stream {} ({}, {} ch, {} Hz)",
            path.display(),
            format.codec,
            channels,
            sample_rate
        );

        Ok(Self {
            track_id: track.id,
            reader,
            decoder,
            format,
            convert: None,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            finished: false,
        })
    }

    /// Decodes the next packet into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
                Err(Error::IoError(e)) => return Err(ChirpError::Io(e)),
                Err(Error::ResetRequired) => return Ok(false),
                Err(e) => return Err(ChirpError::Decode(format!("Error reading packet: {:?}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(Error::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => {
                    return Err(ChirpError::Decode(format!("Error decoding packet: {:?}", e)));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            if self
                .convert
                .as_ref()
                .is_none_or(|buf| (buf.capacity() as u64) < capacity)
            {
                self.convert = Some(SampleBuffer::<f32>::new(capacity, spec));
            }
            let Some(convert) = self.convert.as_mut() else {
                continue;
            };
            convert.copy_interleaved_ref(decoded);

            let channels = self.format.channels as usize;
            let frames = (convert.samples().len() / channels) as u64;
            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;

            self.pending.clear();
            self.pending
                .extend_from_slice(&convert.samples()[skip as usize * channels..]);
            self.pending_pos = 0;

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl StreamSource for SymphoniaStreamSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let channels = self.format.channels as usize;
        let capacity = out.len() - out.len() % channels;
        let mut written = 0;

        while written < capacity {
            if self.pending_pos < self.pending.len() {
                let n = (capacity - written).min(self.pending.len() - self.pending_pos);
                out[written..written + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                written += n;
                self.pending_pos += n;
                continue;
            }
            if self.finished {
                break;
            }
            if !self.decode_next()? {
                self.finished = true;
            }
        }

        Ok(written / channels)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| ChirpError::StreamIo(format!("Seek to frame {} failed: {:?}", frame, e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.finished = false;
        Ok(())
    }
}

fn codec_of(params: &CodecParameters) -> Codec {
    match params.codec {
        CODEC_TYPE_VORBIS => Codec::Vorbis,
        CODEC_TYPE_FLAC => Codec::Flac,
        CODEC_TYPE_MP3 => Codec::Mp3,
        CODEC_TYPE_AAC => Codec::Aac,
        other => match get_codecs().get_codec(other).map(|d| d.short_name) {
            Some(name) if name.starts_with("pcm") => Codec::Pcm,
            Some(name) if name.starts_with("adpcm") => Codec::Adpcm,
            _ => Codec::Unknown,
        },
    }
}

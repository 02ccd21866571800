#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertToMono {
    /// Keep original channels: stereo if input is stereo, mono if input is mono
    Original,
    /// Force mono: if input is mono use it, if input is stereo combine both channels into mono
    ForceMono,
}

/// Sample encoding used to keep a sound resident in a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcmEncoding {
    I8,
    /// Half the footprint of `F32` with no audible loss for playback
    #[default]
    I16,
    F32,
    /// 4-bit ADPCM blocks, decoded while playing
    Adpcm,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// How to handle mono conversion
    pub convert_to_mono: ConvertToMono,
    /// Resident encoding for every sound in the bank
    pub encoding: PcmEncoding,
    /// Resample sounds to this rate while loading. The engine sets its mix rate
    /// here when it loads a bank.
    pub target_sample_rate: Option<u32>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            convert_to_mono: ConvertToMono::Original,
            encoding: PcmEncoding::default(),
            target_sample_rate: None,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert_to_mono(mut self, convert: ConvertToMono) -> Self {
        self.convert_to_mono = convert;
        self
    }

    pub fn encoding(mut self, encoding: PcmEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = Some(rate);
        self
    }
}

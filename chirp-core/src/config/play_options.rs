use crate::looping::LoopRegion;
use crate::group::GroupId;

/// Per-instance parameters for a play request.
///
/// Unset fields take the sound's own defaults (bank sounds carry a volume, pan
/// and loop region), falling back to unity gain, center pan and no looping.
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Volume multiplier (0.0 = silent, 1.0 = full volume)
    pub volume: Option<f32>,
    /// -1.0 (left) to 1.0 (right)
    pub pan: Option<f32>,
    /// Higher priorities are serviced first when the render budget runs out
    pub priority: i32,
    pub group: Option<GroupId>,
    pub looping: Option<LoopRegion>,
    /// Start in the Paused state
    pub paused: bool,
    /// Playback speed; 2.0 plays twice as fast and an octave higher
    pub speed: Option<f32>,
}

impl PlayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = Some(pan);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn looping(mut self, region: LoopRegion) -> Self {
        self.looping = Some(region);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Sets the speed that shifts the pitch by `half_steps` semitones.
    pub fn pitch_shift(self, half_steps: f32) -> Self {
        self.speed(pitch_to_speed(half_steps))
    }
}

/// Speed that shifts the pitch by `half_steps` semitones.
pub fn pitch_to_speed(half_steps: f32) -> f32 {
    2f32.powf(half_steps / 12.0)
}

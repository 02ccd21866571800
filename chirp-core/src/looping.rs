//! Loop regions shared by bank and stream playback.

/// How many times playback jumps back from the loop end to the loop start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopCount {
    Infinite,
    /// `Times(0)` plays straight through.
    Times(u32),
}

/// A loop between two frame positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopRegion {
    pub start: u64,
    /// Exclusive end frame; `None` loops at the end of the sound.
    pub end: Option<u64>,
    pub count: LoopCount,
}

impl LoopRegion {
    pub fn new(start: u64, end: Option<u64>, count: LoopCount) -> Self {
        Self { start, end, count }
    }

    /// Loops the whole sound.
    pub fn whole(count: LoopCount) -> Self {
        Self::new(0, None, count)
    }

    pub fn forever() -> Self {
        Self::whole(LoopCount::Infinite)
    }

    /// Clamps the region to a sound of `total` frames (if known).
    ///
    /// Returns `(start, end)`; an empty or inverted region grows to one frame.
    pub fn bounds(&self, total: Option<u64>) -> (u64, Option<u64>) {
        let end = match (self.end, total) {
            (Some(end), Some(total)) => Some(end.min(total)),
            (None, Some(total)) => Some(total),
            (end, None) => end,
        };
        let start = match end {
            Some(end) => self.start.min(end.saturating_sub(1)),
            None => self.start,
        };
        let end = end.map(|end| end.max(start + 1));
        (start, end)
    }
}

/// Loop progress for one playing instance.
#[derive(Debug, Clone, Default)]
pub struct LoopCursor {
    region: Option<LoopRegion>,
    completed: u32,
    released: bool,
}

impl LoopCursor {
    pub fn new(region: Option<LoopRegion>) -> Self {
        Self {
            region,
            completed: 0,
            released: false,
        }
    }

    pub fn region(&self) -> Option<LoopRegion> {
        self.region
    }

    /// Replaces the region and restarts the loop count.
    pub fn set_region(&mut self, region: Option<LoopRegion>) {
        self.region = region;
        self.completed = 0;
        self.released = false;
    }

    /// Lets playback run past the loop end to the natural end of the sound.
    pub fn release(&mut self) {
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Loops completed so far.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Restarts the loop count (used when playback is repositioned).
    pub fn rewind(&mut self) {
        self.completed = 0;
        self.released = false;
    }

    /// Whether another jump back is still due.
    pub fn is_looping(&self) -> bool {
        match self.region {
            Some(region) if !self.released => match region.count {
                LoopCount::Infinite => true,
                LoopCount::Times(n) => self.completed < n,
            },
            _ => false,
        }
    }

    /// Frame at which playback must stop reading and jump back, if looping.
    pub fn loop_end(&self, total: Option<u64>) -> Option<u64> {
        if !self.is_looping() {
            return None;
        }
        self.region.and_then(|region| region.bounds(total).1)
    }

    /// Records a completed pass and returns the frame to continue from.
    pub fn wrap(&mut self, total: Option<u64>) -> u64 {
        self.completed = self.completed.saturating_add(1);
        self.region
            .map(|region| region.bounds(total).0)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_loop_stops_after_n_wraps() {
        let mut cursor = LoopCursor::new(Some(LoopRegion::whole(LoopCount::Times(2))));
        assert_eq!(cursor.loop_end(Some(100)), Some(100));
        assert_eq!(cursor.wrap(Some(100)), 0);
        assert!(cursor.is_looping());
        cursor.wrap(Some(100));
        assert!(!cursor.is_looping());
        assert_eq!(cursor.loop_end(Some(100)), None);
    }

    #[test]
    fn release_ends_infinite_loop() {
        let mut cursor = LoopCursor::new(Some(LoopRegion::forever()));
        assert!(cursor.is_looping());
        cursor.release();
        assert!(!cursor.is_looping());
        cursor.rewind();
        assert!(cursor.is_looping());
    }

    #[test]
    fn bounds_clamp_to_sound() {
        let region = LoopRegion::new(500, Some(2000), LoopCount::Infinite);
        assert_eq!(region.bounds(Some(1000)), (500, Some(1000)));

        let inverted = LoopRegion::new(800, Some(100), LoopCount::Infinite);
        assert_eq!(inverted.bounds(Some(1000)), (99, Some(100)));
    }

    #[test]
    fn no_region_never_loops() {
        let cursor = LoopCursor::new(None);
        assert!(!cursor.is_looping());
        assert_eq!(cursor.loop_end(Some(10)), None);
    }
}

//! 4-bit adaptive differential PCM for resident bank sounds.
//!
//! Blocks hold [`FRAMES_PER_BLOCK`] frames. Each channel of a block is coded
//! on its own in [`BYTES_PER_BLOCK`] bytes: predictor index, starting step
//! size, the two seed samples, then one signed nibble per remaining sample.
//! The encoder tries every predictor on every block and keeps the one with
//! the smallest squared error.

use crate::alloc::{Allocator, TrackedVec};
use crate::error::Result;

pub const FRAMES_PER_BLOCK: usize = 36;
/// Bytes per channel per block
pub const BYTES_PER_BLOCK: usize = 6 + FRAMES_PER_BLOCK / 2;

/// Prediction coefficients in 8.8 fixed point, applied to the previous two
/// samples.
const COEFFS: [(i32, i32); 7] = [
    (256, 0),
    (512, -256),
    (0, 0),
    (192, 64),
    (240, 0),
    (460, -208),
    (392, -232),
];

const ADAPTATION: [i32; 16] = [
    230, 230, 230, 230, 307, 409, 512, 614, 768, 614, 512, 409, 307, 230, 230, 230,
];

const MIN_DELTA: i32 = 16;

fn predict(s1: i32, s2: i32, predictor: usize) -> i32 {
    let (c1, c2) = COEFFS[predictor];
    (s1 * c1 + s2 * c2) / 256
}

fn adapt(delta: i32, nibble: u8) -> i32 {
    (delta * ADAPTATION[nibble as usize] / 256).clamp(MIN_DELTA, i16::MAX as i32)
}

/// Codes one channel of one block. `input` holds [`FRAMES_PER_BLOCK`]
/// samples; `delta` carries the step size from block to block.
fn encode_channel(input: &[i16], predictor: usize, delta: &mut i32, out: &mut [u8]) {
    out[0] = predictor as u8;
    out[1..3].copy_from_slice(&(*delta as i16).to_le_bytes());
    out[3..5].copy_from_slice(&input[0].to_le_bytes());
    out[5..7].copy_from_slice(&input[1].to_le_bytes());

    let (mut s2, mut s1) = (input[0] as i32, input[1] as i32);
    let mut d = *delta;
    for (i, &sample) in input[2..].iter().enumerate() {
        let predicted = predict(s1, s2, predictor);
        let error = ((sample as i32 - predicted) / d).clamp(-8, 7);
        let nibble = (error & 0xf) as u8;
        let next = (predicted + d * error).clamp(i16::MIN as i32, i16::MAX as i32);
        d = adapt(d, nibble);
        s2 = s1;
        s1 = next;

        let byte = &mut out[7 + i / 2];
        if i % 2 == 0 {
            *byte = nibble;
        } else {
            *byte |= nibble << 4;
        }
    }
    *delta = d;
}

/// Decodes one channel of one block into every `stride`th slot of `out`.
fn decode_channel(input: &[u8], out: &mut [i16], stride: usize) {
    let predictor = (input[0] as usize).min(COEFFS.len() - 1);
    let mut d = (i16::from_le_bytes([input[1], input[2]]) as i32).max(MIN_DELTA);
    let mut s2 = i16::from_le_bytes([input[3], input[4]]) as i32;
    let mut s1 = i16::from_le_bytes([input[5], input[6]]) as i32;
    out[0] = s2 as i16;
    out[stride] = s1 as i16;

    for i in 0..FRAMES_PER_BLOCK - 2 {
        let nibble = (input[7 + i / 2] >> ((i % 2) * 4)) & 0xf;
        let error = if nibble & 0x8 != 0 {
            nibble as i32 - 0x10
        } else {
            nibble as i32
        };
        let next =
            (predict(s1, s2, predictor) + d * error).clamp(i16::MIN as i32, i16::MAX as i32);
        d = adapt(d, nibble);
        s2 = s1;
        s1 = next;
        out[(i + 2) * stride] = next as i16;
    }
}

fn squared_error(a: &[i16], b: &[i16]) -> i64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let e = *x as i64 - *y as i64;
            e * e
        })
        .sum()
}

/// Encodes interleaved `samples` into resident blocks. The last block is
/// padded with silence.
pub fn encode(samples: &[f32], channels: u16, allocator: &Allocator) -> Result<TrackedVec<u8>> {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    let blocks = frames.div_ceil(FRAMES_PER_BLOCK);
    let mut data = allocator.vec(blocks * BYTES_PER_BLOCK * channels, 0u8)?;

    let mut deltas = vec![MIN_DELTA; channels];
    let mut input = [0i16; FRAMES_PER_BLOCK];
    let mut trial = [0u8; BYTES_PER_BLOCK];
    let mut decoded = [0i16; FRAMES_PER_BLOCK];

    for block in 0..blocks {
        for ch in 0..channels {
            for (i, slot) in input.iter_mut().enumerate() {
                let frame = block * FRAMES_PER_BLOCK + i;
                *slot = if frame < frames {
                    (samples[frame * channels + ch].clamp(-1.0, 1.0) * 32767.0).round() as i16
                } else {
                    0
                };
            }

            let at = (block * channels + ch) * BYTES_PER_BLOCK;
            let mut best: Option<(i64, i32)> = None;
            for predictor in 0..COEFFS.len() {
                let mut delta = deltas[ch];
                encode_channel(&input, predictor, &mut delta, &mut trial);
                decode_channel(&trial, &mut decoded, 1);
                let error = squared_error(&input, &decoded);
                if best.is_none_or(|(lowest, _)| error < lowest) {
                    best = Some((error, delta));
                    data[at..at + BYTES_PER_BLOCK].copy_from_slice(&trial);
                }
            }
            if let Some((_, delta)) = best {
                deltas[ch] = delta;
            }
        }
    }
    Ok(data)
}

/// Decodes block `block` of `data` into interleaved `out`, which must hold
/// `FRAMES_PER_BLOCK * channels` samples.
pub fn decode_block(data: &[u8], block: usize, channels: usize, out: &mut [i16]) {
    let at = block * channels * BYTES_PER_BLOCK;
    for ch in 0..channels {
        let start = at + ch * BYTES_PER_BLOCK;
        decode_channel(&data[start..start + BYTES_PER_BLOCK], &mut out[ch..], channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels)
            .map(|i| {
                let frame = i / channels;
                let phase = if i % channels == 0 { 0.0 } else { 1.3 };
                (frame as f32 * 0.05 + phase).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn blocks_are_a_third_of_i16() {
        let data = encode(&sine(360, 2), 2, &Allocator::system()).unwrap();
        assert_eq!(data.len(), 10 * 2 * BYTES_PER_BLOCK);
        assert!(data.len() * 3 <= 360 * 2 * 2);
    }

    #[test]
    fn decoded_audio_tracks_the_input() {
        let input = sine(720, 2);
        let data = encode(&input, 2, &Allocator::system()).unwrap();

        let mut block = [0i16; FRAMES_PER_BLOCK * 2];
        let mut worst = 0.0f32;
        for b in 0..20 {
            decode_block(&data, b, 2, &mut block);
            for (i, s) in block.iter().enumerate() {
                let want = input[b * FRAMES_PER_BLOCK * 2 + i];
                worst = worst.max((*s as f32 / 32768.0 - want).abs());
            }
        }
        assert!(worst < 0.02, "worst error {}", worst);
    }

    #[test]
    fn seed_samples_are_exact() {
        let input = [0.25f32, -0.5, 0.125, 0.0];
        let data = encode(&input, 1, &Allocator::system()).unwrap();
        let mut block = [0i16; FRAMES_PER_BLOCK];
        decode_block(&data, 0, 1, &mut block);
        assert_eq!(block[0], (0.25f32 * 32767.0).round() as i16);
        assert_eq!(block[1], (-0.5f32 * 32767.0).round() as i16);
    }
}

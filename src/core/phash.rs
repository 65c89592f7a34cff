// src/core/phash.rs

//! DCT-based perceptual hashing of screenshots.
//!
//! The image is reduced to a 64×64 grayscale thumbnail, transformed with a
//! 2-D DCT-II, and the 8×8 block of lowest frequencies is compared against its
//! median (the upper of the two middle values). Renders that look alike keep the same coarse frequency structure
//! and therefore differ in only a few of the 64 bits.

use once_cell::sync::Lazy;
use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;

use crate::core::errors::ScanError;

/// Length of every fingerprint, in bits.
pub const HASH_BITS: u32 = 64;

const SAMPLE: usize = 64;
const LOW: usize = 8;
const PREFIX: &str = "p:";

/// cos((2x + 1) · u · π / 2N) for every (u, x) pair, row-major by `u`.
static COSINES: Lazy<Vec<f64>> = Lazy::new(|| {
    let n = SAMPLE as f64;
    (0..SAMPLE)
        .flat_map(|u| {
            (0..SAMPLE).map(move |x| {
                ((2.0 * x as f64 + 1.0) * u as f64 * std::f64::consts::PI / (2.0 * n)).cos()
            })
        })
        .collect()
});

/// A 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Decodes PNG/JPEG bytes and hashes the picture.
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self, ScanError> {
        let img = image::load_from_memory(bytes).map_err(|e| ScanError::Image(e.to_string()))?;
        let thumb = img
            .resize_exact(SAMPLE as u32, SAMPLE as u32, FilterType::Triangle)
            .to_luma8();

        let pixels: Vec<f64> = thumb.pixels().map(|p| f64::from(p.0[0])).collect();
        let coefficients = low_frequencies(&pixels);

        let mut sorted = coefficients;
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[LOW * LOW / 2];

        let bits = coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > median)
            .fold(0u64, |acc, (i, _)| acc | (1 << (LOW * LOW - 1 - i)));
        Ok(Self(bits))
    }

    /// Number of differing bits, always in `[0, HASH_BITS]`.
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// The top-left `LOW`×`LOW` block of the 2-D DCT-II of a `SAMPLE`² image.
fn low_frequencies(pixels: &[f64]) -> [f64; LOW * LOW] {
    // Rows first: for each pixel row keep only the LOW lowest frequencies.
    let mut rows = vec![0.0; SAMPLE * LOW];
    for y in 0..SAMPLE {
        for u in 0..LOW {
            rows[y * LOW + u] = (0..SAMPLE)
                .map(|x| pixels[y * SAMPLE + x] * COSINES[u * SAMPLE + x])
                .sum();
        }
    }

    let mut out = [0.0; LOW * LOW];
    for v in 0..LOW {
        for u in 0..LOW {
            out[v * LOW + u] = (0..SAMPLE)
                .map(|y| rows[y * LOW + u] * COSINES[v * SAMPLE + y])
                .sum();
        }
    }
    out
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix(PREFIX).unwrap_or(s);
        if hex.len() != 16 {
            return Err(ScanError::Image(format!("fingerprint '{s}' is not {HASH_BITS} bits")));
        }
        u64::from_str_radix(hex, 16)
            .map(Self)
            .map_err(|e| ScanError::Image(format!("fingerprint '{s}': {e}")))
    }
}

//! Synthetic frame generation for offline testing.
//!
//! These generators stand in for real optics: a vertical step edge whose
//! contrast tracks focus quality, plus the corrupt shapes a flaky
//! acquisition path produces (all-zero and truncated payloads). Both the
//! simulated frame source and the test suites build frames from here so
//! the sharpness numbers line up across the codebase.

use crate::types::Frame;

/// A frame filled with one value. Zero Laplacian response everywhere.
pub fn uniform_frame(width: u32, height: u32, value: u8, timestamp: f64) -> Frame {
    let data = vec![value; (width * height) as usize];
    Frame::new(data, width, height, timestamp)
}

/// Half-dark/half-bright vertical edge centered on mid-gray.
///
/// `contrast` is the dark-to-bright span in 8-bit counts; the Laplacian
/// variance of the result grows with it, which is what makes these frames
/// useful for focus ordering tests.
pub fn edge_frame(width: u32, height: u32, contrast: f64, timestamp: f64) -> Frame {
    let half = (contrast / 2.0).clamp(0.0, 127.0);
    let dark = (128.0 - half).round() as u8;
    let bright = (128.0 + half).round() as u8;
    let split = width / 2;

    let mut data = vec![0u8; (width * height) as usize];
    for y in 0..height {
        let row = (y * width) as usize;
        for x in 0..width {
            data[row + x as usize] = if x < split { dark } else { bright };
        }
    }
    Frame::new(data, width, height, timestamp)
}

/// All-zero payload: the signature of a dropped DMA transfer.
pub fn zero_frame(width: u32, height: u32, timestamp: f64) -> Frame {
    Frame::new(vec![0u8; (width * height) as usize], width, height, timestamp)
}

/// Payload cut to half its declared size.
pub fn truncated_frame(width: u32, height: u32, timestamp: f64) -> Frame {
    let full = (width * height) as usize;
    Frame::new(vec![128u8; full / 2], width, height, timestamp)
}

/// Lorentzian focus response: contrast peaks at `peak_mm` and rolls off
/// with distance, with `dof_mm` as the half-width.
pub fn focus_contrast(position_mm: f64, peak_mm: f64, dof_mm: f64, max_contrast: f64) -> f64 {
    let dof_sq = dof_mm * dof_mm;
    let dist = position_mm - peak_mm;
    max_contrast * dof_sq / (dof_sq + dist * dist)
}

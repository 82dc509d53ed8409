//! Core value types shared across the scan pipeline.
//!
//! Frames, position samples and scored observations are immutable values;
//! the mutable scan aggregate lives in the `scan` module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::CorruptKind;

/// A single captured image frame.
///
/// Pixel data is row-major, single-channel, 8-bit. The length invariant
/// `pixel_data.len() == width * height` is checked by [`Frame::check_integrity`]
/// before a frame is allowed anywhere near the scorer; a frame that fails it
/// is corrupt (dropped DMA transfer, truncated readout) and must be discarded.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Unique frame identifier
    pub id: String,
    /// Monotonic capture timestamp in seconds (see `timing::ScanClock`)
    pub timestamp: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major single-channel samples, length = width * height when intact
    pub pixel_data: Vec<u8>,
    /// Payload size in bytes
    pub size_bytes: usize,
}

impl Frame {
    /// Create a new frame with a generated id.
    pub fn new(pixel_data: Vec<u8>, width: u32, height: u32, timestamp: f64) -> Self {
        let size_bytes = pixel_data.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            width,
            height,
            pixel_data,
            size_bytes,
        }
    }

    /// Expected payload length for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check the corruption invariants: payload length must match the declared
    /// dimensions, and the payload must not be entirely zero (the signature of
    /// a dropped transfer on the simulated and real acquisition paths alike).
    pub fn check_integrity(&self) -> Result<(), CorruptKind> {
        let expected = self.expected_len();
        if self.pixel_data.len() != expected {
            return Err(CorruptKind::Truncated {
                expected,
                actual: self.pixel_data.len(),
            });
        }
        if !self.pixel_data.is_empty() && self.pixel_data.iter().all(|&p| p == 0) {
            return Err(CorruptKind::AllZero);
        }
        Ok(())
    }
}

/// A position reading from the motion axis at a known instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Monotonic sample timestamp in seconds; negative means "no valid sample"
    pub timestamp: f64,
    /// Axis coordinate in millimeters
    pub position_mm: f64,
}

impl PositionSample {
    pub fn new(timestamp: f64, position_mm: f64) -> Self {
        Self {
            timestamp,
            position_mm,
        }
    }

    /// The sentinel "no valid sample" value.
    pub fn invalid() -> Self {
        Self {
            timestamp: -1.0,
            position_mm: 0.0,
        }
    }

    /// True unless this is the sentinel value.
    pub fn is_valid(&self) -> bool {
        self.timestamp >= 0.0
    }
}

/// One frame correlated with a position and reduced to a focus score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredObservation {
    /// Id of the frame this observation was derived from
    pub frame_id: String,
    /// Axis position correlated with the frame
    pub position_mm: f64,
    /// Sharpness score, higher = sharper
    pub score: f64,
    /// Zero-based arrival order within the sweep
    pub arrival_index: u64,
}

/// Sweep parameters for one scan invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanRange {
    /// Sweep start position (mm)
    pub start_mm: f64,
    /// Sweep end position (mm)
    pub end_mm: f64,
    /// Sweep speed (mm/s)
    pub speed_mm_s: f64,
}

impl ScanRange {
    pub fn new(start_mm: f64, end_mm: f64, speed_mm_s: f64) -> Self {
        Self {
            start_mm,
            end_mm,
            speed_mm_s,
        }
    }

    /// Sweep travel distance (mm, non-negative).
    pub fn distance_mm(&self) -> f64 {
        (self.end_mm - self.start_mm).abs()
    }
}

/// Outcome of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Position the axis was returned to (mm)
    pub winning_position_mm: f64,
    /// Score of the winning observation
    pub winning_score: f64,
    /// Frame that produced the winning observation
    pub winning_frame_id: String,
    /// Number of valid observations recorded during the sweep
    pub observation_count: usize,
    /// Session this result belongs to
    pub session_id: String,
    /// Wall-clock completion stamp
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Cooperative cancellation flag, cloneable across threads.
///
/// Cancelling is one-way: once set, the token stays cancelled until the
/// orchestrator re-arms it at the start of the next scan.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear the flag so the token can gate a fresh scan.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

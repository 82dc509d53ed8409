//! Fault taxonomy for the scan core.
//!
//! `CorruptFrame` is the one recoverable case: the frame is dropped and the
//! sweep continues. Every other variant forces the orchestrator into its
//! terminal `Faulted` state with the cause attached. The core never retries;
//! re-invoking the scan is the caller's retry.

use thiserror::Error;

/// Why a frame failed its integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptKind {
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("payload is entirely zero")]
    AllZero,
}

/// Errors surfaced by the scan core and the device capabilities it consumes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FocusError {
    /// A device failed to open or start.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A frame failed its integrity invariant. Dropped, never fatal.
    #[error("corrupt frame dropped: {0}")]
    CorruptFrame(CorruptKind),

    /// A wait-for-completion move exceeded its bound.
    #[error("motion to {target_mm:.3} mm timed out after {waited_ms} ms")]
    MotionTimeout { target_mm: f64, waited_ms: u64 },

    /// The sweep finished with zero valid observations.
    #[error("sweep produced no usable frames")]
    NoUsableFrames,

    /// A move or scan was requested while one is already active.
    #[error("operation in progress: {0}")]
    ConcurrentOperation(&'static str),

    /// A device reported loss of connection mid-scan.
    #[error("device disconnected: {0}")]
    DeviceDisconnected(String),

    /// The scan was cancelled out-of-band.
    #[error("scan cancelled")]
    Cancelled,
}

impl FocusError {
    /// Process exit code for the CLI shell.
    pub fn exit_code(&self) -> i32 {
        match self {
            FocusError::DeviceUnavailable(_) => 2,
            FocusError::CorruptFrame(_) => 3,
            FocusError::MotionTimeout { .. } => 4,
            FocusError::NoUsableFrames => 5,
            FocusError::ConcurrentOperation(_) => 6,
            FocusError::DeviceDisconnected(_) => 7,
            FocusError::Cancelled => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FocusError::MotionTimeout {
            target_mm: 5.0,
            waited_ms: 3000,
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("5.000"));

        let err = FocusError::CorruptFrame(CorruptKind::Truncated {
            expected: 100,
            actual: 50,
        });
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_exit_codes_distinct() {
        let errs = [
            FocusError::DeviceUnavailable(String::new()),
            FocusError::CorruptFrame(CorruptKind::AllZero),
            FocusError::MotionTimeout {
                target_mm: 0.0,
                waited_ms: 0,
            },
            FocusError::NoUsableFrames,
            FocusError::ConcurrentOperation("scan"),
            FocusError::DeviceDisconnected(String::new()),
            FocusError::Cancelled,
        ];
        let mut codes: Vec<i32> = errs.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}

//! StageFocus: automated focus-hunting for motorized imaging stages
//!
//! This crate sweeps a translation axis across a range while scoring a live
//! image stream for sharpness, then returns the axis to the position of the
//! sharpest frame.
//!
//! # Features
//! - Capability traits for cameras and motion axes, independent of vendor SDKs
//! - Queue-decoupled frame dispatch (slow consumers never stall acquisition)
//! - Per-frame position correlation and Laplacian-variance focus scoring
//! - A faulted-but-never-stuck scan state machine with cancellation
//! - Simulated devices for offline testing and fault injection
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use stagefocus::axis::{MotionAxis, SimulatedAxis, SimulatedAxisConfig};
//! use stagefocus::scan::{ScanOptions, ScanOrchestrator};
//! use stagefocus::source::{SimulatedFrameSource, SimulatedSourceConfig};
//! use stagefocus::timing::ScanClock;
//! use stagefocus::types::ScanRange;
//!
//! let clock = ScanClock::new();
//! let axis = Arc::new(SimulatedAxis::new(SimulatedAxisConfig::default(), clock.clone()));
//! axis.connect().expect("axis connect");
//!
//! let mut source = SimulatedFrameSource::new(
//!     SimulatedSourceConfig::default(),
//!     axis.position_probe(),
//!     clock,
//! );
//!
//! let orchestrator = ScanOrchestrator::with_default_scorer(axis, ScanOptions::default());
//! let result = orchestrator
//!     .run_scan(&mut source, ScanRange::new(0.0, 10.0, 1.0))
//!     .expect("scan");
//! println!("best focus at {:.3} mm", result.winning_position_mm);
//! ```

pub mod axis;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod invariant_ppt;
pub mod scan;
pub mod sharpness;
pub mod source;
pub mod timing;
pub mod types;

// Testing utilities - synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::StageFocusConfig;
pub use errors::{CorruptKind, FocusError};
pub use scan::{ScanOptions, ScanOrchestrator, ScanState};
pub use sharpness::{LaplacianVariance, SharpnessScorer};
pub use types::{CancelToken, Frame, PositionSample, ScanRange, ScanResult, ScoredObservation};

/// Initialize logging for the scan core
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "stagefocus=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_metadata() {
        assert_eq!(NAME, "stagefocus");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}

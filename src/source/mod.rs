//! Frame source capability boundary.
//!
//! A concrete camera driver implements [`FrameSource`]; the core consumes it
//! without knowing anything about SDKs, buses or register maps. Frames are
//! delivered asynchronously through a [`FrameSink`] on a thread the core
//! does not control and must treat as concurrent with everything else.

pub mod simulated;

pub use simulated::{SimulatedFrameSource, SimulatedSourceConfig};

use std::sync::Arc;

use crate::errors::FocusError;
use crate::types::Frame;

/// Asynchronous device fault, reported out-of-band from frame delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFault {
    /// The device dropped its connection; no further frames will arrive.
    Disconnected(String),
}

/// Receiver for frames and faults produced by a [`FrameSource`].
///
/// Both callbacks run on the source's acquisition thread and must return
/// quickly; the dispatcher exists precisely so consumer work never runs
/// here.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Frame);
    fn on_fault(&self, fault: DeviceFault);
}

/// Read-only probe for the axis position, handed to a source at
/// construction when capture-time position tagging is wanted. The probe
/// must be cheap and must not reach into another component's command path.
pub type PositionProbe = Arc<dyn Fn() -> f64 + Send + Sync>;

/// What a camera driver must provide to the scan core.
pub trait FrameSource: Send {
    /// One-time device setup (register programming, buffer allocation).
    fn initialize(&mut self) -> Result<(), FocusError>;

    /// Begin asynchronous acquisition, delivering into `sink`.
    ///
    /// Fails with [`FocusError::DeviceUnavailable`] if the device cannot
    /// start. A started source may still deliver zero frames indefinitely;
    /// callers must not block waiting on delivery.
    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), FocusError>;

    /// Stop acquisition. Idempotent.
    fn stop(&mut self);

    /// Discard frames the driver has queued but not yet delivered.
    fn flush(&mut self);

    /// Current exposure in microseconds.
    fn exposure_us(&self) -> u32;

    /// Set exposure, clamped to [`FrameSource::exposure_bounds`]. Returns
    /// the value actually applied.
    fn set_exposure_us(&mut self, exposure_us: u32) -> u32;

    /// Inclusive (min, max) exposure range in microseconds.
    fn exposure_bounds(&self) -> (u32, u32);
}

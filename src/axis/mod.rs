//! Motion axis capability boundary.
//!
//! A concrete motor driver implements [`MotionAxis`]: absolute moves with an
//! optional completion wait, and synchronous position queries that may block
//! for a hardware round trip. Position reporting is poll-based; there is no
//! motion-completed event.

pub mod simulated;

pub use simulated::{SimulatedAxis, SimulatedAxisConfig};

use std::time::Duration;

use crate::errors::FocusError;
use crate::types::{CancelToken, PositionSample};

/// How close (mm) the reported position must be to a target for a move or a
/// sweep to count as complete.
pub const POSITION_TOLERANCE_MM: f64 = 0.01;

/// Recommended upper bound on the completion-wait polling interval.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Completion behavior for [`MotionAxis::move_absolute`].
///
/// A completion wait always carries a timeout; an unbounded wait on a
/// stalled axis is a hang, and the cancel token lets an out-of-band abort
/// unblock the waiter.
#[derive(Debug, Clone)]
pub enum MoveWait {
    /// Issue the command and return immediately; motion continues.
    NoWait,
    /// Poll the position until within [`POSITION_TOLERANCE_MM`] of target.
    Completion {
        timeout: Duration,
        cancel: CancelToken,
    },
}

/// What a motor driver must provide to the scan core.
///
/// Contract: at most one motion command may be outstanding. Requesting a
/// move while another is executing fails fast with
/// [`FocusError::ConcurrentOperation`] instead of racing commands onto the
/// device. Implementations serialize commands internally on a single
/// command-consumer thread even when callers are concurrent.
pub trait MotionAxis: Send + Sync {
    /// Open the device. Fails with [`FocusError::DeviceUnavailable`].
    fn connect(&self) -> Result<(), FocusError>;

    /// Close the device. Idempotent.
    fn disconnect(&self);

    /// Command an absolute move, clamping `position_mm` to the axis travel
    /// range before issuing.
    fn move_absolute(
        &self,
        position_mm: f64,
        speed_mm_s: f64,
        wait: MoveWait,
    ) -> Result<(), FocusError>;

    /// Read the current position. Synchronous; may block for tens of
    /// milliseconds on a command round trip, so callers must not hold scan
    /// state locks across this call.
    fn position(&self) -> Result<PositionSample, FocusError>;

    /// Lower travel limit (mm). Queried once and cached for a session.
    fn min_position_mm(&self) -> f64;

    /// Upper travel limit (mm). Queried once and cached for a session.
    fn max_position_mm(&self) -> f64;
}

/// Clamp a requested target into the axis travel range.
pub(crate) fn clamp_target(position_mm: f64, min_mm: f64, max_mm: f64) -> f64 {
    position_mm.clamp(min_mm, max_mm)
}

//! Simulated motion axis for offline testing.
//!
//! Models a single-axis translation stage with constant-velocity moves,
//! a configurable position-query latency (the command round trip a real
//! controller would cost), and fault hooks for stall and disconnect
//! scenarios. Commands are serialized on one internal consumer thread, so
//! the one-outstanding-command contract holds even with concurrent callers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{clamp_target, MotionAxis, MoveWait, COMPLETION_POLL_INTERVAL, POSITION_TOLERANCE_MM};
use crate::errors::FocusError;
use crate::source::PositionProbe;
use crate::timing::ScanClock;
use crate::types::PositionSample;

/// Characteristics of the simulated stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedAxisConfig {
    /// Lower travel limit (mm)
    pub min_position_mm: f64,
    /// Upper travel limit (mm)
    pub max_position_mm: f64,
    /// Position at power-on (mm)
    pub initial_position_mm: f64,
    /// Simulated command round trip for position queries (ms)
    pub position_latency_ms: u64,
    /// Kinematic integration step (ms)
    pub update_period_ms: u64,
    /// Speed multiplier so tests can run sweeps faster than real time
    pub time_scale: f64,
    /// Freeze motion at this position without reaching the target
    pub stall_at_mm: Option<f64>,
    /// Refuse to connect, for open-failure tests
    pub fail_connect: bool,
}

impl Default for SimulatedAxisConfig {
    fn default() -> Self {
        Self {
            min_position_mm: 0.0,
            max_position_mm: 25.0,
            initial_position_mm: 0.0,
            position_latency_ms: 5,
            update_period_ms: 1,
            time_scale: 1.0,
            stall_at_mm: None,
            fail_connect: false,
        }
    }
}

#[derive(Debug)]
struct AxisModel {
    position_mm: f64,
    moving: bool,
}

enum AxisCommand {
    MoveTo { target_mm: f64, speed_mm_s: f64 },
    Shutdown,
}

struct AxisShared {
    model: Mutex<AxisModel>,
    busy: AtomicBool,
    connected: AtomicBool,
    disconnected: AtomicBool,
    shutdown: AtomicBool,
    move_count: AtomicU64,
    config: SimulatedAxisConfig,
}

/// Simulated single-axis stage.
pub struct SimulatedAxis {
    shared: Arc<AxisShared>,
    cmd_tx: crossbeam_channel::Sender<AxisCommand>,
    cmd_rx: Mutex<Option<crossbeam_channel::Receiver<AxisCommand>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    clock: ScanClock,
}

impl SimulatedAxis {
    pub fn new(config: SimulatedAxisConfig, clock: ScanClock) -> Self {
        let shared = Arc::new(AxisShared {
            model: Mutex::new(AxisModel {
                position_mm: config.initial_position_mm,
                moving: false,
            }),
            busy: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            move_count: AtomicU64::new(0),
            config,
        });

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        Self {
            shared,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            worker: Mutex::new(None),
            clock,
        }
    }

    /// A read-only view of the stage position, without the command round
    /// trip. This is the explicit dependency a simulated frame source takes
    /// at construction for capture-time focus modelling.
    pub fn position_probe(&self) -> PositionProbe {
        let shared = self.shared.clone();
        Arc::new(move || shared.model.lock().expect("lock poisoned").position_mm)
    }

    /// Total `move_absolute` commands accepted, for cancellation tests.
    pub fn move_command_count(&self) -> u64 {
        self.shared.move_count.load(Ordering::SeqCst)
    }

    /// Whether a commanded move is still executing.
    pub fn is_moving(&self) -> bool {
        self.shared.model.lock().expect("lock poisoned").moving
    }

    /// Simulate a dropped connection: every subsequent call fails with
    /// [`FocusError::DeviceDisconnected`] and motion freezes.
    pub fn inject_disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::SeqCst);
    }

    fn check_link(&self) -> Result<(), FocusError> {
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(FocusError::DeviceDisconnected("simulated axis".to_string()));
        }
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(FocusError::DeviceUnavailable(
                "simulated axis not connected".to_string(),
            ));
        }
        Ok(())
    }
}

impl MotionAxis for SimulatedAxis {
    fn connect(&self) -> Result<(), FocusError> {
        if self.shared.config.fail_connect {
            return Err(FocusError::DeviceUnavailable(
                "simulated axis configured to fail connect".to_string(),
            ));
        }

        // The command consumer spawns on first connect and survives
        // disconnect/connect cycles.
        if let Some(cmd_rx) = self.cmd_rx.lock().expect("lock poisoned").take() {
            let worker_shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name("stagefocus-axis".to_string())
                .spawn(move || axis_worker(worker_shared, cmd_rx))
                .map_err(|e| {
                    FocusError::DeviceUnavailable(format!("axis worker spawn failed: {e}"))
                })?;
            *self.worker.lock().expect("lock poisoned") = Some(handle);
        }

        self.shared.connected.store(true, Ordering::SeqCst);
        log::debug!(
            "simulated axis connected, travel [{:.3}, {:.3}] mm",
            self.shared.config.min_position_mm,
            self.shared.config.max_position_mm
        );
        Ok(())
    }

    fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn move_absolute(
        &self,
        position_mm: f64,
        speed_mm_s: f64,
        wait: MoveWait,
    ) -> Result<(), FocusError> {
        self.check_link()?;
        let target_mm = clamp_target(
            position_mm,
            self.shared.config.min_position_mm,
            self.shared.config.max_position_mm,
        );
        if (target_mm - position_mm).abs() > f64::EPSILON {
            log::warn!(
                "move target {:.3} mm clamped to {:.3} mm",
                position_mm,
                target_mm
            );
        }

        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FocusError::ConcurrentOperation("move_absolute"));
        }

        self.shared.move_count.fetch_add(1, Ordering::SeqCst);
        self.cmd_tx
            .send(AxisCommand::MoveTo {
                target_mm,
                speed_mm_s,
            })
            .map_err(|_| FocusError::DeviceUnavailable("axis worker gone".to_string()))?;

        match wait {
            MoveWait::NoWait => Ok(()),
            MoveWait::Completion { timeout, cancel } => {
                let start = Instant::now();
                loop {
                    if cancel.is_cancelled() {
                        return Err(FocusError::Cancelled);
                    }
                    if start.elapsed() >= timeout {
                        return Err(FocusError::MotionTimeout {
                            target_mm,
                            waited_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                    let sample = self.position()?;
                    if (sample.position_mm - target_mm).abs() <= POSITION_TOLERANCE_MM {
                        return Ok(());
                    }
                    std::thread::sleep(COMPLETION_POLL_INTERVAL);
                }
            }
        }
    }

    fn position(&self) -> Result<PositionSample, FocusError> {
        self.check_link()?;
        // Command round trip happens outside the model lock so the
        // kinematics keep integrating while a caller waits on the reply.
        std::thread::sleep(Duration::from_millis(self.shared.config.position_latency_ms));
        self.check_link()?;
        let position_mm = self.shared.model.lock().expect("lock poisoned").position_mm;
        Ok(PositionSample::new(self.clock.timestamp(), position_mm))
    }

    fn min_position_mm(&self) -> f64 {
        self.shared.config.min_position_mm
    }

    fn max_position_mm(&self) -> f64 {
        self.shared.config.max_position_mm
    }
}

impl Drop for SimulatedAxis {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(AxisCommand::Shutdown);
        if let Some(handle) = self.worker.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn axis_worker(shared: Arc<AxisShared>, cmd_rx: crossbeam_channel::Receiver<AxisCommand>) {
    let period = Duration::from_millis(shared.config.update_period_ms.max(1));
    let dt = period.as_secs_f64();

    while let Ok(cmd) = cmd_rx.recv() {
        let (target_mm, speed_mm_s) = match cmd {
            AxisCommand::Shutdown => break,
            AxisCommand::MoveTo {
                target_mm,
                speed_mm_s,
            } => (target_mm, speed_mm_s),
        };

        {
            let mut model = shared.model.lock().expect("lock poisoned");
            model.moving = true;
        }
        log::debug!("axis moving to {:.3} mm at {:.3} mm/s", target_mm, speed_mm_s);

        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if shared.disconnected.load(Ordering::SeqCst) {
                // Link gone: freeze wherever we are, command stays unfinished.
                break;
            }
            std::thread::sleep(period);

            let mut model = shared.model.lock().expect("lock poisoned");
            let step = (speed_mm_s * shared.config.time_scale * dt).abs();
            let delta = target_mm - model.position_mm;
            let next = model.position_mm + delta.signum() * step.min(delta.abs());

            if let Some(stall_mm) = shared.config.stall_at_mm {
                let lo = model.position_mm.min(next);
                let hi = model.position_mm.max(next);
                if lo <= stall_mm && stall_mm <= hi {
                    // Stalled: hold position, never complete.
                    model.position_mm = stall_mm;
                    drop(model);
                    continue;
                }
            }

            if (next - target_mm).abs() <= POSITION_TOLERANCE_MM {
                // Snap to target the moment the step lands inside tolerance.
                // A position within tolerance is only ever observable with
                // busy already cleared; waiters that see "arrived" can issue
                // the next command without racing the worker.
                model.position_mm = target_mm;
                model.moving = false;
                shared.busy.store(false, Ordering::SeqCst);
                drop(model);
                log::debug!("axis reached {:.3} mm", target_mm);
                break;
            }
            model.position_mm = next;
        }
    }
}

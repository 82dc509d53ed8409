//! Scan orchestration: the home → sweep → evaluate → return state machine.
//!
//! The orchestrator owns the only mutable aggregate in the pipeline, the
//! `ScanSession`. Two lines of control touch it: the dispatch thread (frame
//! handler) and the control thread (sweep-completion poll). Both serialize
//! through the session mutex, and neither holds it across an axis position
//! query, so a frame can never be scored into a sweep that has already been
//! evaluated. That single-writer discipline is what makes the best-of-sweep
//! reduction trustworthy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::assert_invariant;
use crate::axis::{MotionAxis, MoveWait, POSITION_TOLERANCE_MM};
use crate::dispatch::{FrameDispatcher, FrameListener};
use crate::errors::FocusError;
use crate::sharpness::{LaplacianVariance, SharpnessScorer};
use crate::source::{DeviceFault, FrameSink, FrameSource};
use crate::types::{CancelToken, Frame, ScanRange, ScanResult, ScoredObservation};

/// Where the scan state machine currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Homing,
    Sweeping,
    Evaluated,
    Returning,
    Done,
    Faulted(FocusError),
}

/// Control-loop tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Sweep-completion poll cadence (ms)
    pub poll_interval_ms: u64,
    /// Completion bound for homing and return moves (ms)
    pub move_timeout_ms: u64,
    /// Sweep deadline multiplier over the nominal distance/speed duration
    pub sweep_slack: f64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            move_timeout_ms: 5_000,
            sweep_slack: 3.0,
        }
    }
}

/// Mutable per-scan aggregate. Only ever touched under its mutex.
struct ScanSession {
    id: String,
    state: ScanState,
    observations: Vec<ScoredObservation>,
    corrupt_frames: u64,
    late_frames: u64,
}

impl ScanSession {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: ScanState::Idle,
            observations: Vec::new(),
            corrupt_frames: 0,
            late_frames: 0,
        }
    }

    fn reset(&mut self) {
        self.id = uuid::Uuid::new_v4().to_string();
        self.state = ScanState::Idle;
        self.observations.clear();
        self.corrupt_frames = 0;
        self.late_frames = 0;
    }
}

/// Runs on the dispatch thread: integrity check, position correlation,
/// scoring, and the guarded append into the session.
struct FrameHandler {
    session: Arc<Mutex<ScanSession>>,
    axis: Arc<dyn MotionAxis>,
    scorer: Arc<dyn SharpnessScorer>,
    fault: Arc<Mutex<Option<FocusError>>>,
}

impl FrameListener for FrameHandler {
    fn on_frame(&self, frame: Frame) {
        // Cheap pre-check so late frames do not cost an axis round trip.
        {
            let mut session = self.session.lock().expect("lock poisoned");
            if session.state != ScanState::Sweeping {
                session.late_frames += 1;
                return;
            }
        }

        if let Err(kind) = frame.check_integrity() {
            log::debug!("dropping corrupt frame {}: {}", frame.id, kind);
            self.session.lock().expect("lock poisoned").corrupt_frames += 1;
            return;
        }
        if frame.width < 3 || frame.height < 3 {
            log::debug!(
                "dropping degenerate {}x{} frame {}",
                frame.width,
                frame.height,
                frame.id
            );
            self.session.lock().expect("lock poisoned").corrupt_frames += 1;
            return;
        }

        // Correlate: one synchronous position poll per frame. The session
        // lock is NOT held here; this call can block on a hardware round
        // trip.
        let sample = match self.axis.position() {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("position poll failed during sweep: {}", e);
                let mut fault = self.fault.lock().expect("lock poisoned");
                fault.get_or_insert(e);
                return;
            }
        };
        if !sample.is_valid() {
            log::warn!("axis returned no valid sample; frame {} dropped", frame.id);
            return;
        }

        assert_invariant!(
            frame.pixel_data.len() == frame.expected_len(),
            "only intact frames are scored",
            "scan::on_frame"
        );
        let score = self.scorer.score(&frame);

        let mut session = self.session.lock().expect("lock poisoned");
        if session.state == ScanState::Sweeping {
            let arrival_index = session.observations.len() as u64;
            log::debug!(
                "observation {}: {:.3} mm scored {:.1}",
                arrival_index,
                sample.position_mm,
                score
            );
            session.observations.push(ScoredObservation {
                frame_id: frame.id,
                position_mm: sample.position_mm,
                score,
                arrival_index,
            });
        } else {
            // Scored while the sweep was closing; the reduction is sealed.
            session.late_frames += 1;
        }
    }
}

/// Bridges the source's acquisition thread into the dispatcher and routes
/// device faults to the control loop.
struct ScanSink {
    dispatcher: Arc<FrameDispatcher>,
    fault: Arc<Mutex<Option<FocusError>>>,
}

impl FrameSink for ScanSink {
    fn on_frame(&self, frame: Frame) {
        self.dispatcher.enqueue(frame);
    }

    fn on_fault(&self, fault: DeviceFault) {
        let DeviceFault::Disconnected(what) = fault;
        log::error!("device fault during scan: {} disconnected", what);
        let mut cell = self.fault.lock().expect("lock poisoned");
        cell.get_or_insert(FocusError::DeviceDisconnected(what));
    }
}

/// Pick the winning observation: maximum score, ties broken by earliest
/// arrival (strict comparison keeps the first maximum seen).
fn select_best(observations: &[ScoredObservation]) -> Option<&ScoredObservation> {
    let mut iter = observations.iter();
    let mut best = iter.next()?;
    for obs in iter {
        if obs.score > best.score {
            best = obs;
        }
    }
    Some(best)
}

/// Drives one focus hunt over a [`MotionAxis`] and a [`FrameSource`].
pub struct ScanOrchestrator {
    axis: Arc<dyn MotionAxis>,
    scorer: Arc<dyn SharpnessScorer>,
    options: ScanOptions,
    session: Arc<Mutex<ScanSession>>,
    active: AtomicBool,
    cancel: CancelToken,
    fault: Arc<Mutex<Option<FocusError>>>,
}

impl ScanOrchestrator {
    pub fn new(
        axis: Arc<dyn MotionAxis>,
        scorer: Arc<dyn SharpnessScorer>,
        options: ScanOptions,
    ) -> Self {
        Self {
            axis,
            scorer,
            options,
            session: Arc::new(Mutex::new(ScanSession::new())),
            active: AtomicBool::new(false),
            cancel: CancelToken::new(),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Orchestrator with the default Laplacian-variance metric.
    pub fn with_default_scorer(axis: Arc<dyn MotionAxis>, options: ScanOptions) -> Self {
        Self::new(axis, Arc::new(LaplacianVariance), options)
    }

    /// Token for out-of-band cancellation (user abort, watchdog). Valid for
    /// the current and any future scan on this orchestrator.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current state of the most recent scan.
    pub fn state(&self) -> ScanState {
        self.session.lock().expect("lock poisoned").state.clone()
    }

    /// Valid observations recorded by the most recent scan.
    pub fn observation_count(&self) -> usize {
        self.session.lock().expect("lock poisoned").observations.len()
    }

    /// Corrupt frames dropped by the most recent scan.
    pub fn corrupt_frame_count(&self) -> u64 {
        self.session.lock().expect("lock poisoned").corrupt_frames
    }

    /// Frames that arrived after the sweep was sealed and were refused.
    pub fn late_frame_count(&self) -> u64 {
        self.session.lock().expect("lock poisoned").late_frames
    }

    fn set_state(&self, state: ScanState) {
        let mut session = self.session.lock().expect("lock poisoned");
        log::debug!("scan state {:?} -> {:?}", session.state, state);
        session.state = state;
    }

    /// Run one full focus hunt: home to the sweep start, sweep to the end
    /// while scoring frames, then return to the sharpest position.
    ///
    /// One scan at a time per orchestrator; a concurrent call fails fast
    /// with [`FocusError::ConcurrentOperation`]. The core never retries —
    /// on a fault the caller decides whether to invoke again.
    pub fn run_scan(
        &self,
        source: &mut dyn FrameSource,
        range: ScanRange,
    ) -> Result<ScanResult, FocusError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(FocusError::ConcurrentOperation("run_scan"));
        }

        self.cancel.reset();
        *self.fault.lock().expect("lock poisoned") = None;
        self.session.lock().expect("lock poisoned").reset();

        let result = self.drive(source, range);
        match &result {
            Ok(result) => {
                self.set_state(ScanState::Done);
                log::info!(
                    "scan complete: best focus {:.3} mm (score {:.1}, {} observations)",
                    result.winning_position_mm,
                    result.winning_score,
                    result.observation_count
                );
            }
            Err(e) => {
                log::error!("scan faulted: {}", e);
                self.set_state(ScanState::Faulted(e.clone()));
            }
        }

        self.active.store(false, Ordering::SeqCst);
        result
    }

    fn drive(
        &self,
        source: &mut dyn FrameSource,
        range: ScanRange,
    ) -> Result<ScanResult, FocusError> {
        // Travel limits are queried once and cached for the session.
        let min_mm = self.axis.min_position_mm();
        let max_mm = self.axis.max_position_mm();
        let start_mm = range.start_mm.clamp(min_mm, max_mm);
        let end_mm = range.end_mm.clamp(min_mm, max_mm);
        let move_timeout = Duration::from_millis(self.options.move_timeout_ms);

        log::info!(
            "starting scan: sweep [{:.3}, {:.3}] mm at {:.3} mm/s",
            start_mm,
            end_mm,
            range.speed_mm_s
        );

        // Homing
        self.set_state(ScanState::Homing);
        self.axis.move_absolute(
            start_mm,
            range.speed_mm_s,
            MoveWait::Completion {
                timeout: move_timeout,
                cancel: self.cancel.clone(),
            },
        )?;

        // Acquisition plumbing: source -> sink -> dispatcher -> handler.
        let handler = Arc::new(FrameHandler {
            session: self.session.clone(),
            axis: self.axis.clone(),
            scorer: self.scorer.clone(),
            fault: self.fault.clone(),
        });
        let dispatcher = Arc::new(FrameDispatcher::start(handler)?);
        let sink = Arc::new(ScanSink {
            dispatcher: dispatcher.clone(),
            fault: self.fault.clone(),
        });

        source.initialize()?;
        source.start(sink)?;

        // Sweeping
        self.set_state(ScanState::Sweeping);
        let sweep_result = self.sweep(end_mm, range);

        // Seal the session before tearing acquisition down: once the state
        // leaves Sweeping the handler refuses every further frame, so
        // nothing queued or in flight can leak into the reduction.
        {
            let mut session = self.session.lock().expect("lock poisoned");
            session.state = match &sweep_result {
                Ok(()) => ScanState::Evaluated,
                Err(e) => ScanState::Faulted(e.clone()),
            };
        }

        source.stop();
        source.flush();
        let flushed = dispatcher.flush();
        if flushed > 0 {
            log::debug!("discarded {} undelivered frames after sweep", flushed);
        }
        if let Err(e) = dispatcher.stop(Duration::from_secs(1)) {
            log::warn!("dispatcher teardown: {}", e);
        }
        sweep_result?;

        // Evaluate
        let best = {
            let session = self.session.lock().expect("lock poisoned");
            if session.corrupt_frames > 0 {
                log::warn!(
                    "sweep dropped {} corrupt frames ({} usable)",
                    session.corrupt_frames,
                    session.observations.len()
                );
            }
            let best = select_best(&session.observations)
                .ok_or(FocusError::NoUsableFrames)?
                .clone();
            assert_invariant!(
                session.observations.iter().all(|o| o.score <= best.score),
                "winning score is the sweep maximum",
                "scan::evaluate"
            );
            best
        };

        // Returning
        self.set_state(ScanState::Returning);
        self.axis.move_absolute(
            best.position_mm,
            range.speed_mm_s,
            MoveWait::Completion {
                timeout: move_timeout,
                cancel: self.cancel.clone(),
            },
        )?;

        let (session_id, observation_count) = {
            let session = self.session.lock().expect("lock poisoned");
            (session.id.clone(), session.observations.len())
        };

        Ok(ScanResult {
            winning_position_mm: best.position_mm,
            winning_score: best.score,
            winning_frame_id: best.frame_id,
            observation_count,
            session_id,
            completed_at: chrono::Utc::now(),
        })
    }

    /// Issue the sweep move and poll until the axis reaches the end, the
    /// deadline passes, a device faults, or the scan is cancelled. Never
    /// holds the session lock: the dispatch thread must stay free to score
    /// frames while this loop waits on position round trips.
    fn sweep(&self, end_mm: f64, range: ScanRange) -> Result<(), FocusError> {
        self.axis
            .move_absolute(end_mm, range.speed_mm_s, MoveWait::NoWait)?;

        let nominal_s = if range.speed_mm_s > 0.0 {
            // Cap at a day so a pathological range cannot produce an
            // effectively unbounded deadline (min() also absorbs NaN).
            (range.distance_mm() / range.speed_mm_s).min(86_400.0)
        } else {
            0.0
        };
        let deadline = Duration::from_secs_f64((nominal_s * self.options.sweep_slack).max(0.0))
            + Duration::from_millis(self.options.move_timeout_ms);
        let poll_interval = Duration::from_millis(self.options.poll_interval_ms.max(1));
        let started = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(FocusError::Cancelled);
            }
            if let Some(fault) = self.fault.lock().expect("lock poisoned").take() {
                return Err(fault);
            }

            let sample = self.axis.position()?;
            if (sample.position_mm - end_mm).abs() <= POSITION_TOLERANCE_MM {
                log::debug!(
                    "sweep complete at {:.3} mm after {:?}",
                    sample.position_mm,
                    started.elapsed()
                );
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(FocusError::MotionTimeout {
                    target_mm: end_mm,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{SimulatedAxis, SimulatedAxisConfig};
    use crate::testing::synthetic_data::{edge_frame, zero_frame};
    use crate::timing::ScanClock;

    fn obs(score: f64, arrival_index: u64) -> ScoredObservation {
        ScoredObservation {
            frame_id: format!("frame-{arrival_index}"),
            position_mm: arrival_index as f64,
            score,
            arrival_index,
        }
    }

    #[test]
    fn test_select_best_max_score() {
        let observations = vec![obs(1.0, 0), obs(5.0, 1), obs(3.0, 2)];
        let best = select_best(&observations).expect("best");
        assert_eq!(best.arrival_index, 1);
    }

    #[test]
    fn test_select_best_tie_takes_earliest() {
        let observations = vec![obs(2.0, 0), obs(5.0, 1), obs(5.0, 2), obs(5.0, 3)];
        let best = select_best(&observations).expect("best");
        assert_eq!(best.arrival_index, 1);
    }

    #[test]
    fn test_select_best_empty() {
        assert!(select_best(&[]).is_none());
    }

    fn handler_fixture() -> (FrameHandler, Arc<Mutex<ScanSession>>) {
        let session = Arc::new(Mutex::new(ScanSession::new()));
        let axis = Arc::new(SimulatedAxis::new(
            SimulatedAxisConfig {
                position_latency_ms: 0,
                initial_position_mm: 4.0,
                ..Default::default()
            },
            ScanClock::new(),
        ));
        axis.connect().expect("connect");
        let handler = FrameHandler {
            session: session.clone(),
            axis,
            scorer: Arc::new(LaplacianVariance),
            fault: Arc::new(Mutex::new(None)),
        };
        (handler, session)
    }

    #[test]
    fn test_handler_records_valid_frame_while_sweeping() {
        let (handler, session) = handler_fixture();
        session.lock().expect("lock").state = ScanState::Sweeping;

        handler.on_frame(edge_frame(16, 16, 200.0, 0.1));

        let session = session.lock().expect("lock");
        assert_eq!(session.observations.len(), 1);
        assert!((session.observations[0].position_mm - 4.0).abs() <= POSITION_TOLERANCE_MM);
        assert!(session.observations[0].score > 0.0);
    }

    #[test]
    fn test_handler_drops_corrupt_frame() {
        let (handler, session) = handler_fixture();
        session.lock().expect("lock").state = ScanState::Sweeping;

        handler.on_frame(zero_frame(16, 16, 0.1));

        let session = session.lock().expect("lock");
        assert!(session.observations.is_empty());
        assert_eq!(session.corrupt_frames, 1);
    }

    #[test]
    fn test_handler_rejects_frame_after_evaluation() {
        let (handler, session) = handler_fixture();
        session.lock().expect("lock").state = ScanState::Evaluated;

        handler.on_frame(edge_frame(16, 16, 200.0, 0.1));

        let session = session.lock().expect("lock");
        assert!(session.observations.is_empty());
        assert_eq!(session.late_frames, 1);
    }

    #[test]
    fn test_handler_drops_degenerate_dimensions() {
        let (handler, session) = handler_fixture();
        session.lock().expect("lock").state = ScanState::Sweeping;

        // 2x2 passes the length invariant but has no scorable interior.
        handler.on_frame(Frame::new(vec![10, 200, 10, 200], 2, 2, 0.1));

        let session = session.lock().expect("lock");
        assert!(session.observations.is_empty());
        assert_eq!(session.corrupt_frames, 1);
    }
}

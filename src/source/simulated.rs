//! Simulated frame source for offline testing.
//!
//! Produces synthetic edge frames on its own acquisition thread. Focus is
//! modelled explicitly: the source takes a read-only position probe at
//! construction and scales frame contrast by how close the probed position
//! is to a configured focal peak, so the Laplacian variance of a frame
//! tracks focus proximity the way a real camera on a real stage would.
//!
//! Fault injection is deterministic: every Nth frame is delivered corrupt
//! (alternating all-zero and truncated payloads, the two shapes a dropped
//! DMA transfer leaves behind), and `inject_disconnect` drives the
//! out-of-band fault channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DeviceFault, FrameSink, FrameSource, PositionProbe};
use crate::errors::FocusError;
use crate::testing::synthetic_data::{edge_frame, focus_contrast, truncated_frame, zero_frame};
use crate::timing::ScanClock;

/// Characteristics of the simulated camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSourceConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Interval between produced frames (ms)
    pub frame_period_ms: u64,
    /// Exposure lower bound (microseconds)
    pub exposure_min_us: u32,
    /// Exposure upper bound (microseconds)
    pub exposure_max_us: u32,
    /// Exposure applied at initialization (microseconds)
    pub exposure_us: u32,
    /// Deliver every Nth frame corrupt; 0 disables fault injection
    pub corrupt_every: u32,
    /// Stage position of best focus (mm)
    pub peak_position_mm: f64,
    /// Half-width of the focus response (mm)
    pub depth_of_field_mm: f64,
    /// Edge contrast at perfect focus (8-bit counts)
    pub max_contrast: f64,
    /// Refuse to start, for open-failure tests
    pub fail_start: bool,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            frame_period_ms: 15,
            exposure_min_us: 100,
            exposure_max_us: 50_000,
            exposure_us: 10_000,
            corrupt_every: 0,
            peak_position_mm: 12.5,
            depth_of_field_mm: 2.0,
            max_contrast: 220.0,
            fail_start: false,
        }
    }
}

/// Simulated camera delivering frames on a dedicated acquisition thread.
pub struct SimulatedFrameSource {
    config: SimulatedSourceConfig,
    probe: PositionProbe,
    clock: ScanClock,
    exposure_us: u32,
    running: Arc<AtomicBool>,
    disconnect: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SimulatedFrameSource {
    /// Create a source reading stage position through `probe`.
    pub fn new(config: SimulatedSourceConfig, probe: PositionProbe, clock: ScanClock) -> Self {
        let exposure_us = config
            .exposure_us
            .clamp(config.exposure_min_us, config.exposure_max_us);
        Self {
            config,
            probe,
            clock,
            exposure_us,
            running: Arc::new(AtomicBool::new(false)),
            disconnect: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Simulate a dropped connection: the acquisition thread reports the
    /// fault through the sink's error channel and stops producing.
    pub fn inject_disconnect(&self) {
        self.disconnect.store(true, Ordering::SeqCst);
    }
}

impl FrameSource for SimulatedFrameSource {
    fn initialize(&mut self) -> Result<(), FocusError> {
        log::debug!(
            "simulated source initialized: {}x{} @ {} ms, exposure {} us",
            self.config.width,
            self.config.height,
            self.config.frame_period_ms,
            self.exposure_us
        );
        Ok(())
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), FocusError> {
        if self.config.fail_start {
            return Err(FocusError::DeviceUnavailable(
                "simulated source configured to fail start".to_string(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(()); // already running
        }

        let config = self.config.clone();
        let probe = self.probe.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();
        let disconnect = self.disconnect.clone();

        let handle = std::thread::Builder::new()
            .name("stagefocus-acquire".to_string())
            .spawn(move || acquisition_loop(config, probe, clock, running, disconnect, sink))
            .map_err(|e| FocusError::DeviceUnavailable(format!("acquire spawn failed: {e}")))?;

        *self.thread.lock().expect("lock poisoned") = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
    }

    fn flush(&mut self) {
        // Frames are handed to the sink as produced; the simulated driver
        // holds no internal queue to discard.
        log::debug!("simulated source flush: nothing buffered");
    }

    fn exposure_us(&self) -> u32 {
        self.exposure_us
    }

    fn set_exposure_us(&mut self, exposure_us: u32) -> u32 {
        self.exposure_us =
            exposure_us.clamp(self.config.exposure_min_us, self.config.exposure_max_us);
        self.exposure_us
    }

    fn exposure_bounds(&self) -> (u32, u32) {
        (self.config.exposure_min_us, self.config.exposure_max_us)
    }
}

impl Drop for SimulatedFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    config: SimulatedSourceConfig,
    probe: PositionProbe,
    clock: ScanClock,
    running: Arc<AtomicBool>,
    disconnect: Arc<AtomicBool>,
    sink: Arc<dyn FrameSink>,
) {
    let period = Duration::from_millis(config.frame_period_ms.max(1));
    let mut frame_counter: u64 = 0;
    let mut corrupt_counter: u64 = 0;

    while running.load(Ordering::SeqCst) {
        if disconnect.load(Ordering::SeqCst) {
            log::warn!("simulated source: connection lost");
            sink.on_fault(DeviceFault::Disconnected("simulated source".to_string()));
            running.store(false, Ordering::SeqCst);
            break;
        }

        std::thread::sleep(period);
        frame_counter += 1;
        let timestamp = clock.timestamp();

        let corrupt = config.corrupt_every > 0 && frame_counter % config.corrupt_every as u64 == 0;
        let frame = if corrupt {
            corrupt_counter += 1;
            if corrupt_counter % 2 == 1 {
                zero_frame(config.width, config.height, timestamp)
            } else {
                truncated_frame(config.width, config.height, timestamp)
            }
        } else {
            let position_mm = (probe)();
            let contrast = focus_contrast(
                position_mm,
                config.peak_position_mm,
                config.depth_of_field_mm,
                config.max_contrast,
            );
            edge_frame(config.width, config.height, contrast, timestamp)
        };

        sink.on_frame(frame);
    }
    log::debug!("acquisition thread exiting after {} frames", frame_counter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    struct CountingSink {
        frames: AtomicU64,
        faults: AtomicU64,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: AtomicU64::new(0),
                faults: AtomicU64::new(0),
            })
        }
    }

    impl FrameSink for CountingSink {
        fn on_frame(&self, _frame: crate::types::Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        fn on_fault(&self, _fault: DeviceFault) {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fixed_probe(position_mm: f64) -> PositionProbe {
        Arc::new(move || position_mm)
    }

    fn quick_config() -> SimulatedSourceConfig {
        SimulatedSourceConfig {
            frame_period_ms: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_produces_frames_until_stopped() {
        let sink = CountingSink::new();
        let mut source =
            SimulatedFrameSource::new(quick_config(), fixed_probe(12.5), ScanClock::new());
        source.initialize().expect("initialize");
        source.start(sink.clone()).expect("start");

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.frames.load(Ordering::SeqCst) < 5 {
            assert!(Instant::now() < deadline, "no frames produced");
            std::thread::sleep(Duration::from_millis(2));
        }
        source.stop();
        let after_stop = sink.frames.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.frames.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_fail_start() {
        let sink = CountingSink::new();
        let mut source = SimulatedFrameSource::new(
            SimulatedSourceConfig {
                fail_start: true,
                ..quick_config()
            },
            fixed_probe(0.0),
            ScanClock::new(),
        );
        assert!(matches!(
            source.start(sink),
            Err(FocusError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_exposure_clamped() {
        let mut source =
            SimulatedFrameSource::new(quick_config(), fixed_probe(0.0), ScanClock::new());
        assert_eq!(source.set_exposure_us(10), 100);
        assert_eq!(source.set_exposure_us(1_000_000), 50_000);
        assert_eq!(source.set_exposure_us(2_000), 2_000);
        assert_eq!(source.exposure_us(), 2_000);
        assert_eq!(source.exposure_bounds(), (100, 50_000));
    }

    #[test]
    fn test_disconnect_reports_fault_once() {
        let sink = CountingSink::new();
        let mut source =
            SimulatedFrameSource::new(quick_config(), fixed_probe(0.0), ScanClock::new());
        source.start(sink.clone()).expect("start");
        source.inject_disconnect();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.faults.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "fault never reported");
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.faults.load(Ordering::SeqCst), 1);
        source.stop();
    }

    #[test]
    fn test_corruption_interval() {
        struct CapturingSink {
            corrupt: AtomicU64,
            valid: AtomicU64,
        }
        impl FrameSink for CapturingSink {
            fn on_frame(&self, frame: crate::types::Frame) {
                if frame.check_integrity().is_ok() {
                    self.valid.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.corrupt.fetch_add(1, Ordering::SeqCst);
                }
            }
            fn on_fault(&self, _fault: DeviceFault) {}
        }

        let sink = Arc::new(CapturingSink {
            corrupt: AtomicU64::new(0),
            valid: AtomicU64::new(0),
        });
        let mut source = SimulatedFrameSource::new(
            SimulatedSourceConfig {
                corrupt_every: 2,
                ..quick_config()
            },
            fixed_probe(12.5),
            ScanClock::new(),
        );
        source.start(sink.clone()).expect("start");

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.corrupt.load(Ordering::SeqCst) + sink.valid.load(Ordering::SeqCst) < 20 {
            assert!(Instant::now() < deadline, "not enough frames");
            std::thread::sleep(Duration::from_millis(2));
        }
        source.stop();

        let corrupt = sink.corrupt.load(Ordering::SeqCst);
        let valid = sink.valid.load(Ordering::SeqCst);
        // Every second frame corrupt: counts within one of each other.
        assert!((corrupt as i64 - valid as i64).abs() <= 1);
    }

    #[test]
    fn test_contrast_follows_probe() {
        use crate::sharpness::{LaplacianVariance, SharpnessScorer};

        let config = quick_config();
        let clock = ScanClock::new();
        let near = edge_frame(
            config.width,
            config.height,
            focus_contrast(12.5, 12.5, 2.0, 220.0),
            clock.timestamp(),
        );
        let far = edge_frame(
            config.width,
            config.height,
            focus_contrast(2.0, 12.5, 2.0, 220.0),
            clock.timestamp(),
        );
        let scorer = LaplacianVariance;
        assert!(scorer.score(&near) > scorer.score(&far));
    }
}

//! Frame dispatch: decouples the acquisition thread from frame consumers.
//!
//! The acquisition callback runs on a thread the core does not control and
//! must never be made to wait on consumer work. Frames are therefore pushed
//! into an unbounded FIFO and redelivered one at a time on a dedicated
//! dispatch thread. Delivery order equals production order; a slow listener
//! only delays dispatch, it never blocks or drops acquisition.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::assert_invariant;
use crate::errors::FocusError;
use crate::types::Frame;

/// Receiver of dispatched frames, invoked on the dispatch thread.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

struct QueueInner {
    items: VecDeque<(u64, Frame)>,
    next_seq: u64,
    flushed: u64,
    closed: bool,
}

struct Shared {
    queue: Mutex<QueueInner>,
    cv: Condvar,
    delivered: Mutex<u64>,
}

impl Shared {
    /// Take the oldest queued frame, waiting until one arrives or the
    /// dispatcher is closed. Waiting must stay interruptible: close()
    /// notifies the condvar so the dispatch thread never sleeps through
    /// its own shutdown.
    fn pop_blocking(&self) -> Option<(u64, Frame)> {
        let mut g = self.queue.lock().expect("lock poisoned");
        loop {
            if g.closed {
                return None;
            }
            if let Some(item) = g.items.pop_front() {
                return Some(item);
            }
            g = self.cv.wait(g).expect("lock poisoned");
        }
    }
}

/// Strictly ordered, unbounded frame queue with a single dispatch thread.
pub struct FrameDispatcher {
    shared: Arc<Shared>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl FrameDispatcher {
    /// Spawn the dispatch thread delivering to `listener`.
    pub fn start(listener: Arc<dyn FrameListener>) -> Result<Self, FocusError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueInner {
                items: VecDeque::new(),
                next_seq: 0,
                flushed: 0,
                closed: false,
            }),
            cv: Condvar::new(),
            delivered: Mutex::new(0),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("stagefocus-dispatch".to_string())
            .spawn(move || dispatch_loop(thread_shared, listener))
            .map_err(|e| FocusError::DeviceUnavailable(format!("dispatch spawn failed: {e}")))?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue one frame from the producer side. Never blocks on the
    /// listener; the queue is unbounded by design so acquisition keeps
    /// running however slow the consumer is.
    pub fn enqueue(&self, frame: Frame) {
        let mut g = self.shared.queue.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        let seq = g.next_seq;
        g.next_seq += 1;
        g.items.push_back((seq, frame));
        self.shared.cv.notify_one();
    }

    /// Atomically drain every queued-but-undelivered frame without invoking
    /// the listener for them. Returns how many frames were discarded.
    pub fn flush(&self) -> usize {
        let mut g = self.shared.queue.lock().expect("lock poisoned");
        let drained = g.items.len();
        g.items.clear();
        g.flushed += drained as u64;
        drained
    }

    /// Stop the dispatch thread. A frame already taken off the queue is
    /// delivered to completion; everything still queued is abandoned.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), FocusError> {
        {
            let mut g = self.shared.queue.lock().expect("lock poisoned");
            g.closed = true;
            self.shared.cv.notify_all();
        }

        let handle = self.thread.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let start = Instant::now();
            let mut handle = Some(handle);
            loop {
                let finished = handle.as_ref().is_some_and(|h| h.is_finished());
                if finished {
                    let _ = handle.take().expect("handle present").join();
                    break;
                }
                if start.elapsed() >= join_timeout {
                    // Do not hang forever; keep the handle so a later stop can retry.
                    *self.thread.lock().expect("lock poisoned") = handle.take();
                    return Err(FocusError::DeviceUnavailable(
                        "dispatch thread did not stop within join timeout".to_string(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }

    /// Frames delivered to the listener so far.
    pub fn delivered(&self) -> u64 {
        *self.shared.delivered.lock().expect("lock poisoned")
    }

    /// Frames discarded by flush() so far.
    pub fn flushed(&self) -> u64 {
        self.shared.queue.lock().expect("lock poisoned").flushed
    }

    /// Frames currently queued and awaiting dispatch.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().expect("lock poisoned").items.len()
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop(Duration::from_millis(200)) {
            log::warn!("dispatch thread did not stop cleanly: {}", e);
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>, listener: Arc<dyn FrameListener>) {
    let mut last_seq: Option<u64> = None;
    while let Some((seq, frame)) = shared.pop_blocking() {
        // Sequence numbers are assigned at enqueue; flush may skip some, but
        // delivery must never reorder.
        assert_invariant!(
            last_seq.map_or(true, |last| seq > last),
            "frames dispatch in strictly increasing enqueue order",
            "dispatch_loop"
        );
        last_seq = Some(seq);

        listener.on_frame(frame);
        *shared.delivered.lock().expect("lock poisoned") += 1;
    }
    log::debug!("dispatch thread exiting");
}

//! The one background worker the concurrency model allows: spatial
//! realignment of published intensity frames.
//!
//! The worker owns its own handle to a shared, internally synchronized
//! buffer rather than a reference back into the builder, avoiding a cycle
//! between reader and worker; a `terminate` flag plus a join on drop keep
//! the two in step without one outliving the other's state. No realignment
//! algorithm is pinned down here (this crate has no hardware to validate
//! one against); the hook point below is the identity transform, ready for
//! a real motion-correction kernel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::cube::builder::IntensityFrame;
use crate::error::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Background thread that watches the shared intensity-frame buffer and
/// realigns frames as they are published.
///
/// Dropping this joins the thread after signalling `terminate`, so no
/// handle ever outlives the buffer it was given.
pub struct RealignmentWorker {
    terminate: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RealignmentWorker {
    pub fn spawn(frames: Arc<Mutex<Vec<IntensityFrame>>>, terminate: Arc<AtomicBool>) -> Result<Self> {
        let worker_terminate = Arc::clone(&terminate);
        let handle = thread::Builder::new()
            .name("flim-realign".to_string())
            .spawn(move || run(&frames, &worker_terminate))?;

        Ok(Self { terminate, handle: Some(handle) })
    }
}

impl Drop for RealignmentWorker {
    fn drop(&mut self) {
        self.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(frames: &Arc<Mutex<Vec<IntensityFrame>>>, terminate: &AtomicBool) {
    let mut last_seen = 0usize;
    while !terminate.load(Ordering::Acquire) {
        {
            let mut guard = match frames.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.len() > last_seen {
                for frame in guard.iter_mut().skip(last_seen) {
                    realign_in_place(frame);
                }
                last_seen = guard.len();
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn realign_in_place(_frame: &mut IntensityFrame) {
    // Hook point for motion correction; identity until a real kernel lands.
}

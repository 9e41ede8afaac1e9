//! Vsync worker (spec.md §4.7).
//!
//! Grounded on `examples/original_source/vsyncworker.h`/`.cpp`: a dedicated
//! thread that blocks on the next vblank and invokes a callback with its
//! timestamp, falling back to a synthetic phased sleep when the hardware
//! vblank ioctl is unavailable (headless/virtual displays, or a transient
//! kernel error).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{trace, warn};

use crate::device::api::KernelDevice;

const ONE_SECOND_NS: i64 = 1_000_000_000;

/// Invoked once per vblank with the display index and its monotonic
/// timestamp in nanoseconds (`VsyncCallback::Callback`).
pub trait VsyncCallback: Send + Sync {
    fn on_vsync(&self, display: usize, timestamp_ns: i64);
}

struct State {
    enabled: bool,
    exiting: bool,
    last_timestamp: i64,
}

/// Returns the timestamp of the next vsync in phase with `last_timestamp`,
/// per `VSyncWorker::GetPhasedVSync`'s worked example in the original.
fn phased_vsync(frame_ns: i64, current: i64, last_timestamp: i64) -> i64 {
    if last_timestamp < 0 {
        return current + frame_ns;
    }
    frame_ns * ((current - last_timestamp) / frame_ns + 1) + last_timestamp
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Sleeps until the next phased vsync deadline and returns its timestamp,
/// used when `KernelDevice::wait_vblank` fails (`SyntheticWaitVBlank`).
fn synthetic_wait_vblank(refresh_hz: f64, last_timestamp: i64) -> i64 {
    let refresh_hz = if refresh_hz > 0.0 { refresh_hz } else { 60.0 };
    let frame_ns = (ONE_SECOND_NS as f64 / refresh_hz) as i64;
    let current = now_ns();
    let deadline = phased_vsync(frame_ns, current, last_timestamp);
    let sleep_ns = deadline - current;
    if sleep_ns > 0 {
        std::thread::sleep(Duration::from_nanos(sleep_ns as u64));
    }
    deadline
}

/// One display's vsync-generation thread. `VSyncControl` toggles it on and
/// off without tearing the thread down; a disabled worker parks on a
/// condvar rather than spinning.
pub struct VsyncWorker {
    shared: Arc<(Mutex<State>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl VsyncWorker {
    /// Spawns the worker for `display`, scanning out on CRTC pipe `pipe`.
    /// `refresh_hz` is read fresh on every synthetic fallback so a concurrent
    /// modeset is picked up without restarting the worker.
    pub fn spawn(
        display: usize,
        pipe: u32,
        device: Arc<dyn KernelDevice>,
        refresh_hz: Arc<Mutex<f64>>,
        callback: Arc<dyn VsyncCallback>,
    ) -> Self {
        let shared = Arc::new((
            Mutex::new(State {
                enabled: false,
                exiting: false,
                last_timestamp: -1,
            }),
            Condvar::new(),
        ));
        let thread_shared = shared.clone();

        let handle = std::thread::Builder::new()
            .name(format!("vsync-{display}"))
            .spawn(move || {
                let (mutex, cvar) = &*thread_shared;
                loop {
                    let mut guard = mutex.lock().unwrap();
                    if !guard.enabled {
                        guard = cvar
                            .wait_while(guard, |s| !s.enabled && !s.exiting)
                            .unwrap();
                    }
                    if guard.exiting {
                        return;
                    }
                    let last_timestamp = guard.last_timestamp;
                    drop(guard);

                    let timestamp = match device.wait_vblank(pipe) {
                        Ok(reply) => reply.timestamp_ns,
                        Err(err) => {
                            trace!(?err, display, "hardware vblank unavailable, using synthetic wait");
                            let hz = *refresh_hz.lock().unwrap();
                            synthetic_wait_vblank(hz, last_timestamp)
                        }
                    };

                    let mut guard = mutex.lock().unwrap();
                    if guard.exiting {
                        return;
                    }
                    if !guard.enabled {
                        continue;
                    }
                    guard.last_timestamp = timestamp;
                    drop(guard);

                    callback.on_vsync(display, timestamp);
                }
            })
            .expect("failed to spawn vsync worker thread");

        VsyncWorker {
            shared,
            handle: Some(handle),
        }
    }

    /// `VSyncControl`: enabling resets phase tracking so the first vsync
    /// after re-enabling isn't computed against a stale timestamp.
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut guard = self.shared.0.lock().unwrap();
            guard.enabled = enabled;
            guard.last_timestamp = -1;
        }
        self.shared.1.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.0.lock().unwrap().enabled
    }

    pub fn exit(&mut self) {
        {
            let mut guard = self.shared.0.lock().unwrap();
            guard.exiting = true;
        }
        self.shared.1.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VsyncWorker {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Guards against a synthetic-fallback warning being logged more than once
/// per display; used by callers that want to surface the degraded mode
/// without flooding the log every frame.
pub struct FallbackWarnOnce(AtomicBool);

impl Default for FallbackWarnOnce {
    fn default() -> Self {
        FallbackWarnOnce(AtomicBool::new(false))
    }
}

impl FallbackWarnOnce {
    pub fn warn_once(&self, display: usize) {
        if !self.0.swap(true, Ordering::Relaxed) {
            warn!(display, "falling back to synthetic vsync generation");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::real::fake::FakeDevice;
    use std::sync::mpsc;

    struct Sink(mpsc::Sender<(usize, i64)>);
    impl VsyncCallback for Sink {
        fn on_vsync(&self, display: usize, timestamp_ns: i64) {
            let _ = self.0.send((display, timestamp_ns));
        }
    }

    #[test]
    fn phased_vsync_matches_worked_example() {
        assert_eq!(phased_vsync(50, 683, 137), 687);
    }

    #[test]
    fn phased_vsync_with_no_prior_timestamp_is_one_frame_ahead() {
        assert_eq!(phased_vsync(1_000, 10_000, -1), 11_000);
    }

    #[test]
    fn disabled_worker_emits_nothing_until_enabled() {
        let (tx, rx) = mpsc::channel();
        let device: Arc<dyn KernelDevice> = Arc::new(FakeDevice::single_internal_display());
        let refresh = Arc::new(Mutex::new(60.0));
        let mut worker = VsyncWorker::spawn(0, 0, device, refresh, Arc::new(Sink(tx)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        worker.set_enabled(true);
        let (display, timestamp) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(display, 0);
        assert!(timestamp >= 0);
        worker.exit();
    }
}

//! Generic bounded FIFO worker (spec.md §4.8).
//!
//! Grounded directly on `examples/original_source/queue_worker.h`'s
//! `QueueWorker<T>`/`Worker` pair: a dedicated OS thread owns a bounded
//! `VecDeque<T>`, guarded by a mutex and condition variable, with independent
//! timeouts for "space available to enqueue" and "idle with nothing to do".
//! Smithay itself has no analogous threaded-worker abstraction (its workers
//! are `calloop` callbacks on the caller's thread), so this is expressed from
//! first principles using `std::thread`/`Mutex`/`Condvar`, in the same plain,
//! un-generic-heavy style the teacher uses for its own `session`/`udev`
//! backends.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// No timeout: wait indefinitely (`QueueWorker::kTimeoutDisabled`).
pub const TIMEOUT_DISABLED: Option<Duration> = None;

/// Delegate invoked by the worker thread; mirrors `QueueWorker::ProcessWork`/
/// `ProcessIdle`.
pub trait QueueWorkerDelegate<T: Send + 'static>: Send + 'static {
    /// Called once per dequeued item, outside the queue lock.
    fn process_work(&mut self, item: T);
    /// Called once when `idle_timeout` elapses with nothing queued.
    fn process_idle(&mut self) {}
}

struct Shared<T> {
    queue: VecDeque<T>,
    exiting: bool,
    idled_out: bool,
}

/// A named worker thread draining a bounded queue of `T`, per spec.md §4.8.
pub struct QueueWorker<T: Send + 'static> {
    shared: Arc<(Mutex<Shared<T>>, Condvar)>,
    max_queue_size: usize,
    queue_timeout: Option<Duration>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> QueueWorker<T> {
    /// Spawns the worker thread. `max_queue_size` defaults to 2 in the
    /// original; callers needing a different depth (the display compositor
    /// uses `DRM_DISPLAY_BUFFERS = 3`) pass it explicitly.
    pub fn spawn<D: QueueWorkerDelegate<T>>(
        name: &str,
        max_queue_size: usize,
        idle_timeout: Option<Duration>,
        mut delegate: D,
    ) -> Self {
        let shared = Arc::new((
            Mutex::new(Shared {
                queue: VecDeque::new(),
                exiting: false,
                idled_out: false,
            }),
            Condvar::new(),
        ));
        let thread_shared = shared.clone();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let (mutex, cvar) = &*thread_shared;
                loop {
                    let mut guard = mutex.lock().unwrap();
                    let wait_timeout = if guard.idled_out { None } else { idle_timeout };

                    let item = match wait_timeout {
                        None => {
                            guard = cvar
                                .wait_while(guard, |s| s.queue.is_empty() && !s.exiting)
                                .unwrap();
                            if guard.exiting && guard.queue.is_empty() {
                                break;
                            }
                            guard.queue.pop_front()
                        }
                        Some(timeout) => {
                            let (g, result) = cvar
                                .wait_timeout_while(guard, timeout, |s| {
                                    s.queue.is_empty() && !s.exiting
                                })
                                .unwrap();
                            guard = g;
                            if guard.exiting && guard.queue.is_empty() {
                                break;
                            }
                            if result.timed_out() && guard.queue.is_empty() {
                                guard.idled_out = true;
                                drop(guard);
                                trace!(worker = %thread_name, "idle timeout, processing idle");
                                delegate.process_idle();
                                continue;
                            }
                            guard.queue.pop_front()
                        }
                    };

                    guard.idled_out = false;
                    drop(guard);
                    cvar.notify_all();

                    if let Some(item) = item {
                        delegate.process_work(item);
                    }
                }
                debug!(worker = %thread_name, "worker exited");
            })
            .expect("failed to spawn worker thread");

        QueueWorker {
            shared,
            max_queue_size,
            queue_timeout: TIMEOUT_DISABLED,
            handle: Some(handle),
        }
    }

    pub fn set_queue_timeout(&mut self, timeout: Option<Duration>) {
        self.queue_timeout = timeout;
    }

    /// `QueueWork`: blocks (cooperatively, via condvar) until there is room
    /// in the queue, the worker is exiting, or `queue_timeout` elapses.
    pub fn queue_work(&self, item: T) -> Result<()> {
        let (mutex, cvar) = &*self.shared;
        let mut guard = mutex.lock().unwrap();

        let deadline = self.queue_timeout.map(|t| Instant::now() + t);
        loop {
            if guard.exiting {
                return Err(Error::Interrupted);
            }
            if guard.queue.len() < self.max_queue_size {
                break;
            }
            match deadline {
                None => guard = cvar.wait(guard).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (g, result) = cvar.wait_timeout(guard, deadline - now).unwrap();
                    guard = g;
                    if result.timed_out()
                        && guard.queue.len() >= self.max_queue_size
                        && !guard.exiting
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }

        guard.queue.push_back(item);
        drop(guard);
        cvar.notify_all();
        Ok(())
    }

    pub fn is_work_pending(&self) -> bool {
        !self.shared.0.lock().unwrap().queue.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.0.lock().unwrap().idled_out
    }

    /// Shuts the worker down: sets the exit flag, wakes it, and joins.
    /// Idempotent (a second call is a no-op since the handle is already gone).
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

impl<T: Send + 'static> Drop for QueueWorker<T> {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    struct Echo(mpsc::Sender<u32>);
    impl QueueWorkerDelegate<u32> for Echo {
        fn process_work(&mut self, item: u32) {
            let _ = self.0.send(item);
        }
    }

    struct CountIdle(Arc<Mutex<u32>>);
    impl QueueWorkerDelegate<()> for CountIdle {
        fn process_work(&mut self, _item: ()) {}
        fn process_idle(&mut self) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn items_are_processed_in_fifo_order() {
        let (tx, rx) = mpsc::channel();
        let mut worker = QueueWorker::spawn("test-fifo", 8, None, Echo(tx));
        worker.queue_work(1).unwrap();
        worker.queue_work(2).unwrap();
        worker.queue_work(3).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 3);
        worker.exit();
    }

    #[test]
    fn queue_work_rejects_after_exit() {
        let (tx, _rx) = mpsc::channel();
        let mut worker = QueueWorker::spawn("test-exit", 2, None, Echo(tx));
        worker.exit();
        assert!(matches!(worker.queue_work(1), Err(Error::Interrupted)));
    }

    #[test]
    fn idle_timeout_invokes_process_idle() {
        let count = Arc::new(Mutex::new(0u32));
        let mut worker = QueueWorker::spawn(
            "test-idle",
            2,
            Some(Duration::from_millis(20)),
            CountIdle(count.clone()),
        );
        std::thread::sleep(Duration::from_millis(100));
        worker.exit();
        assert!(*count.lock().unwrap() >= 1);
    }
}

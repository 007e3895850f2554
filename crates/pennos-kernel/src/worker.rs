//! The cooperatively-preemptible worker underneath every process.
//!
//! A worker is a host thread driven by the scheduler: it starts parked,
//! [`WorkerHandle::resume`] lets it run for one quantum, and
//! [`WorkerHandle::request_suspend`] parks it again at its next preemption
//! point (entered from every system call and from explicit yields). Blocking
//! calls park themselves with [`WorkerHandle::suspend_self`].
//!
//! Cancellation and exit-self unwind the worker thread with a recognized
//! panic payload, so every cleanup guard the worker holds (notably the
//! spawn-redirection guard) runs on the way out.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Parked,
    Running,
    Finished,
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    suspend_requested: bool,
    cancelled: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    cond: Condvar,
}

/// Payload carried by a cancellation unwind.
struct Cancelled;

/// Payload carried by an exit-self unwind.
struct ExitRequest;

/// The default panic hook would report every cancellation unwind as a crash;
/// filter our control-flow payloads out once, the first time a worker spawns.
fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<Cancelled>() || info.payload().is::<ExitRequest>() {
                return;
            }
            previous(info);
        }));
    });
}

impl Shared {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Parked,
                suspend_requested: false,
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Worker-side: park until the scheduler resumes us. Unwinds when the
    /// worker has been cancelled.
    fn park_current(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = RunState::Parked;
        self.cond.notify_all();
        drop(inner);
        self.wait_until_running();
    }

    /// Worker-side: wait for the scheduler without touching the state. The
    /// thread starts in `Parked`, so the first resume may already have
    /// happened by the time the thread body runs.
    fn wait_until_running(&self) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.cancelled {
                drop(inner);
                panic::panic_any(Cancelled);
            }
            if inner.state == RunState::Running {
                return;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Worker-side: honor a pending suspend request or cancellation.
    fn checkpoint(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.cancelled {
            drop(inner);
            panic::panic_any(Cancelled);
        }
        if inner.suspend_requested {
            inner.suspend_requested = false;
            drop(inner);
            self.park_current();
        }
    }

    fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = RunState::Finished;
        self.cond.notify_all();
    }

    /// Scheduler-side: let a parked worker run.
    fn resume(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.suspend_requested = false;
        if inner.state == RunState::Parked {
            inner.state = RunState::Running;
            self.cond.notify_all();
        }
    }

    /// Scheduler-side: ask a running worker to park and wait until it has.
    /// Returns immediately when the worker is already parked or finished.
    ///
    /// A worker stalled in blocking host I/O (a shell waiting on stdin) has
    /// no preemption point to park at; after `timeout` the request is left
    /// pending — the worker parks at its next preemption point — and `false`
    /// is returned so the scheduler can move on.
    fn request_suspend(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RunState::Running {
            return true;
        }
        inner.suspend_requested = true;
        let deadline = Instant::now() + timeout;
        while inner.state == RunState::Running {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
        true
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = true;
        self.cond.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().state == RunState::Finished
    }
}

/// Owner of a worker thread. Held by the PCB; joined when the process is
/// reaped.
pub struct Worker {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a worker. The body does not run until the first
    /// [`WorkerHandle::resume`]; it receives its own control handle.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Worker>
    where
        F: FnOnce(WorkerHandle) + Send + 'static,
    {
        install_panic_hook();
        let shared = Arc::new(Shared::new());
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    thread_shared.wait_until_running();
                    body(WorkerHandle(Arc::clone(&thread_shared)));
                }));
                thread_shared.finish();
                if let Err(payload) = result
                    && !payload.is::<Cancelled>()
                    && !payload.is::<ExitRequest>()
                {
                    panic::resume_unwind(payload);
                }
            })?;
        Ok(Worker {
            shared,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle(Arc::clone(&self.shared))
    }

    /// Wait for the thread to finish and release it.
    pub fn join(&mut self) {
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("worker thread panicked");
        }
    }

    /// Give up on the thread without joining it. Used at shutdown for a
    /// worker stalled in blocking host I/O, which has no cancellation point
    /// to unwind from; process exit collects it.
    pub fn detach(mut self) {
        self.join.take();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // An unjoined worker must not outlive the kernel unobserved.
        if let Some(join) = self.join.take() {
            self.shared.cancel();
            let _ = join.join();
        }
    }
}

/// Cloneable control handle over one worker.
#[derive(Clone)]
pub struct WorkerHandle(Arc<Shared>);

impl WorkerHandle {
    pub fn resume(&self) {
        self.0.resume();
    }

    pub fn request_suspend(&self, timeout: Duration) -> bool {
        self.0.request_suspend(timeout)
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    /// Called on the worker's own thread: honor pending suspend/cancel.
    pub fn checkpoint(&self) {
        self.0.checkpoint();
    }

    /// Called on the worker's own thread: park until resumed.
    pub fn suspend_self(&self) {
        self.0.park_current();
    }

    /// Called on the worker's own thread: unwind and finish the worker,
    /// running every cleanup guard on the stack.
    pub fn exit_self(&self) -> ! {
        panic::panic_any(ExitRequest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn body_waits_for_first_resume() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut worker = Worker::spawn("t", move |_| {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));

        worker.handle().resume();
        worker.join();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn suspend_request_parks_at_checkpoint() {
        let steps = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&steps);
        let worker = Worker::spawn("t", move |handle| {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                handle.checkpoint();
            }
        })
        .unwrap();
        let handle = worker.handle();

        handle.resume();
        thread::sleep(Duration::from_millis(10));
        assert!(handle.request_suspend(Duration::from_secs(1)));
        let frozen = steps.load(Ordering::SeqCst);
        assert!(frozen > 0);

        // Parked: no further progress.
        thread::sleep(Duration::from_millis(10));
        assert_eq!(steps.load(Ordering::SeqCst), frozen);

        handle.resume();
        thread::sleep(Duration::from_millis(10));
        assert!(steps.load(Ordering::SeqCst) > frozen);
        handle.cancel();
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_unwinds_cleanup_guards() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let mut worker = Worker::spawn("t", move |handle| {
            let _guard = SetOnDrop(flag);
            loop {
                handle.checkpoint();
            }
        })
        .unwrap();
        let handle = worker.handle();

        handle.resume();
        thread::sleep(Duration::from_millis(10));
        handle.cancel();
        worker.join();
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(handle.is_finished());
    }

    #[test]
    fn cancel_wakes_a_suspended_worker() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let mut worker = Worker::spawn("t", move |handle| {
            let _guard = SetOnDrop(flag);
            handle.suspend_self();
        })
        .unwrap();
        let handle = worker.handle();

        handle.resume();
        thread::sleep(Duration::from_millis(10));
        // The worker parked itself; cancellation must still unwind it.
        handle.cancel();
        worker.join();
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn suspend_request_times_out_on_a_stalled_worker() {
        let mut worker = Worker::spawn("t", move |_| {
            // No preemption point in here, like a worker stuck in host I/O.
            thread::sleep(Duration::from_millis(100));
        })
        .unwrap();
        let handle = worker.handle();
        handle.resume();
        assert!(!handle.request_suspend(Duration::from_millis(10)));
        worker.join();
    }

    #[test]
    fn exit_self_finishes_the_worker() {
        let mut worker = Worker::spawn("t", move |handle| {
            handle.exit_self();
        })
        .unwrap();
        worker.handle().resume();
        worker.join();
        assert!(worker.handle().is_finished());
    }
}

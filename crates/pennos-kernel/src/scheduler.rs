//! The quantum loop: pick, resume, tick, suspend, requeue.

use std::thread;
use std::time::Duration;

use crate::host::{HostEvent, HostSignals};
use crate::kernel::Kernel;
use crate::log::Event;
use crate::pcb::{PID_INIT, Pid, ProcState};
use crate::signal::Signal;
use crate::worker::WorkerHandle;

/// One scheduling quantum.
pub const QUANTUM: Duration = Duration::from_millis(100);

/// Fixed rotation over the three priority queues encoding the 9:6:4 ratio:
/// priority 0 appears 9 times, priority 1 six times, priority 2 four times.
pub const ROTATION: [usize; 19] = [0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 1, 0, 2, 0, 1, 0, 2, 1];

/// Drives every worker from the main kernel flow: exactly one worker runs
/// per quantum, everything else stays suspended.
pub struct Scheduler {
    kernel: Kernel,
    quantum: Duration,
    rotation_idx: usize,
    signals: Option<HostSignals>,
}

impl Scheduler {
    pub fn new(kernel: Kernel, quantum: Duration) -> Self {
        Self {
            kernel,
            quantum,
            rotation_idx: 0,
            signals: None,
        }
    }

    pub fn set_host_signals(&mut self, signals: HostSignals) {
        self.signals = Some(signals);
    }

    /// Run until shutdown is requested. Each iteration is one tick: dispatch
    /// the next runnable process (or idle), let one quantum elapse, suspend
    /// the worker, wake expired sleepers, and requeue the process if it is
    /// still running.
    pub fn run(&mut self) {
        loop {
            self.relay_host_signals();
            if self.kernel.shutdown_requested() {
                break;
            }

            let Some((pid, handle)) = self.dispatch() else {
                self.idle();
                continue;
            };

            handle.resume();
            thread::sleep(self.quantum);
            // Give a slow worker a fair chance to park before moving on; a
            // worker stalled in host I/O parks at its next preemption point.
            handle.request_suspend(self.quantum.max(Duration::from_millis(20)));

            let mut state = self.kernel.lock();
            state.tick_sleep_check();
            if state
                .procs
                .get(pid)
                .is_some_and(|pcb| pcb.state == ProcState::Running)
            {
                if let Some(pcb) = state.procs.get_mut(pid) {
                    pcb.state = ProcState::Ready;
                }
                state.enqueue(pid);
            }
            state.current = None;
            state.tick += 1;
        }
        tracing::info!("scheduler: shutdown requested, exiting");
    }

    /// No runnable process: let the tick elapse, then run the sleep pass.
    fn idle(&self) {
        thread::sleep(self.quantum);
        let mut state = self.kernel.lock();
        state.tick_sleep_check();
        state.tick += 1;
    }

    /// Choose the next runnable process by advancing the rotation until it
    /// lands on a non-empty queue, and mark it running.
    fn dispatch(&mut self) -> Option<(Pid, WorkerHandle)> {
        let mut state = self.kernel.lock();

        let runnable: Vec<usize> = (0..3).filter(|&prio| !state.ready_empty(prio)).collect();
        if runnable.is_empty() {
            return None;
        }

        let mut chosen = None;
        for _ in 0..ROTATION.len() {
            let prio = ROTATION[self.rotation_idx];
            self.rotation_idx = (self.rotation_idx + 1) % ROTATION.len();
            if runnable.contains(&prio) {
                chosen = Some(prio);
                break;
            }
        }
        let pid = state.dequeue(chosen?)?;

        if let Some(pcb) = state.procs.get_mut(pid) {
            pcb.state = ProcState::Running;
        }
        state.current = Some(pid);
        state.log_event(Event::Schedule, pid);

        let handle = state.procs.get(pid)?.worker.as_ref()?.handle();
        Some((pid, handle))
    }

    /// Translate a deferred host signal into a guest signal for the
    /// terminal-foreground process. Init is never a relay target.
    fn relay_host_signals(&self) {
        let Some(signals) = &self.signals else {
            return;
        };
        let Some(event) = signals.take() else {
            return;
        };
        let Some(foreground) = self.kernel.foreground() else {
            return;
        };
        if foreground == PID_INIT {
            return;
        }
        let signal = match event {
            HostEvent::Interrupt => Signal::Term,
            HostEvent::Stop => Signal::Stop,
        };
        if let Err(err) = self.kernel.send_signal(foreground, signal) {
            tracing::debug!(pid = foreground, ?err, "host signal relay dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_encodes_the_weighted_ratio() {
        let count = |prio| ROTATION.iter().filter(|&&p| p == prio).count();
        assert_eq!(count(0), 9);
        assert_eq!(count(1), 6);
        assert_eq!(count(2), 4);
    }
}

//! The kernel state: one explicit value holding the mounted filesystem, the
//! process table, the scheduler queues, and the event log, shared behind a
//! single lock.
//!
//! Only the currently running worker (or the scheduler, between quanta)
//! takes the lock, and every critical section is short, so contention is
//! incidental rather than structural.

mod process;
mod queues;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use pennfat::{FatFs, FsError, FsResult};

use crate::errno::{Errno, SysResult};
use crate::log::EventLog;
use crate::pcb::{NUM_PRIO, PID_INIT, Pid, ProcState, ProcessTable};
use crate::signal::Signal;

/// Everything the kernel owns.
pub(crate) struct KernelState {
    pub(crate) fs: Option<FatFs>,
    pub(crate) procs: ProcessTable,
    pub(crate) ready: [VecDeque<Pid>; NUM_PRIO],
    pub(crate) blocked: Vec<Pid>,
    pub(crate) tick: u64,
    pub(crate) current: Option<Pid>,
    pub(crate) foreground: Option<Pid>,
    pub(crate) shutdown: bool,
    pub(crate) log: EventLog,
    pub(crate) last_errno: Option<Errno>,
}

/// Snapshot of one process, as shown by `ps`.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Pid,
    pub prio: u8,
    pub state: ProcState,
    pub cmd_name: String,
}

/// Shared handle on the kernel state. Syscalls, the scheduler, and the boot
/// path all operate through clones of this.
#[derive(Clone)]
pub struct Kernel {
    state: Arc<spin::Mutex<KernelState>>,
}

impl Kernel {
    pub fn new(log_path: Option<&Path>) -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(KernelState {
                fs: None,
                procs: ProcessTable::new(),
                ready: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                blocked: Vec::new(),
                tick: 0,
                current: None,
                foreground: None,
                shutdown: false,
                log: EventLog::create(log_path),
                last_errno: None,
            })),
        }
    }

    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, KernelState> {
        self.state.lock()
    }

    /// Mount the volume backing all FS syscalls. A second mount while one is
    /// live is rejected.
    pub fn mount(&self, image: &Path) -> FsResult<()> {
        let fs = FatFs::mount(image)?;
        let mut state = self.lock();
        if state.fs.is_some() {
            return Err(FsError::Busy);
        }
        state.fs = Some(fs);
        Ok(())
    }

    pub fn unmount(&self) -> FsResult<()> {
        let fs = self.lock().fs.take().ok_or(FsError::NotMounted)?;
        fs.unmount()
    }

    pub fn request_shutdown(&self) {
        self.lock().shutdown = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.lock().shutdown
    }

    pub fn tick(&self) -> u64 {
        self.lock().tick
    }

    /// The PID host-originated signals are relayed to. `None` while no
    /// process controls the terminal.
    pub fn foreground(&self) -> Option<Pid> {
        self.lock().foreground
    }

    pub fn set_foreground(&self, pid: Option<Pid>) {
        if let Some(pid) = pid
            && pid < PID_INIT
        {
            return;
        }
        self.lock().foreground = pid;
    }

    pub fn last_errno(&self) -> Option<Errno> {
        self.lock().last_errno
    }

    /// Deliver a guest signal: terminate cancels the worker and produces a
    /// zombie, stop/continue move the target out of and back into the ready
    /// queues. Init is protected.
    pub fn send_signal(&self, pid: Pid, signal: Signal) -> SysResult<()> {
        if pid == PID_INIT {
            return Err(Errno::NotPermitted);
        }
        let cancel = {
            let mut state = self.lock();
            if state.procs.get(pid).is_none() {
                return Err(Errno::NoSuchProcess);
            }
            state.deliver_signal(pid, signal)
        };
        // Cancellation wakes the worker's unwind, whose cleanup guards may
        // need the kernel lock; never cancel while holding it.
        if let Some(handle) = cancel {
            handle.cancel();
        }
        Ok(())
    }

    /// Every live process, for `ps`.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        let state = self.lock();
        state
            .procs
            .pids()
            .into_iter()
            .filter_map(|pid| state.procs.get(pid))
            .map(|pcb| ProcessInfo {
                pid: pcb.pid,
                ppid: pcb.ppid,
                prio: pcb.prio,
                state: pcb.state,
                cmd_name: pcb.cmd_name.clone(),
            })
            .collect()
    }

    /// Forced teardown at shutdown: cancel every worker, then join them once
    /// their unwinds (and cleanup guards) have run.
    pub fn kill_all(&self) {
        let mut workers = Vec::new();
        {
            let mut state = self.lock();
            for pid in state.procs.pids() {
                if let Some(mut pcb) = state.procs.remove(pid)
                    && let Some(worker) = pcb.worker.take()
                {
                    workers.push(worker);
                }
            }
            state.ready.iter_mut().for_each(VecDeque::clear);
            state.blocked.clear();
            state.current = None;
        }
        for worker in &workers {
            worker.handle().cancel();
        }
        for mut worker in workers {
            let handle = worker.handle();
            let mut waited = 0;
            while !handle.is_finished() && waited < 100 {
                std::thread::sleep(std::time::Duration::from_millis(5));
                waited += 1;
            }
            if handle.is_finished() {
                worker.join();
            } else {
                // Stalled in blocking host I/O (the shell reading stdin);
                // there is no cancellation point to unwind from.
                worker.detach();
            }
        }
    }
}

//! The PennOS kernel: a preemptive, priority-aware user-level scheduler with
//! signal-driven job control, bound to the PennFAT filesystem through the
//! system-call surface user programs see.
//!
//! One kernel flow (the scheduler) drives cooperatively-preemptible workers;
//! exactly one worker runs per 100 ms quantum, so kernel state needs no
//! internal locking discipline beyond the single state lock. Host signals
//! are deferred to atomic flags and relayed between quanta to the
//! terminal-foreground process.

mod boot;
mod errno;
mod host;
mod init;
mod jobs;
mod kernel;
mod log;
mod pcb;
mod scheduler;
mod signal;
mod syscall;
mod worker;

pub use boot::{BootConfig, BootError, boot};
pub use errno::{Errno, SysResult};
pub use host::{HostEvent, HostSignals};
pub use jobs::{Job, JobState, JobTable};
pub use kernel::{Kernel, ProcessInfo};
pub use log::{Event, EventLog};
pub use pcb::{MAX_FD, MAX_PROC, NUM_PRIO, PID_INIT, PID_INVALID, Pid, ProcState};
pub use scheduler::{QUANTUM, ROTATION, Scheduler};
pub use signal::{Signal, WaitStatus};
pub use syscall::{Entry, Process, Redirect};
pub use worker::{Worker, WorkerHandle};

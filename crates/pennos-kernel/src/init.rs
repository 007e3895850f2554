//! Process 1: spawns the shell, adopts and reaps orphans, restarts the shell
//! if it dies, and observes the shutdown flag.

use crate::errno::{Errno, SysResult};
use crate::kernel::Kernel;
use crate::log::Event;
use crate::pcb::{PID_INVALID, Pid};
use crate::syscall::{Entry, Process, Redirect};
use crate::worker::Worker;

impl Kernel {
    /// Create PID 1 and hand it the shell entry. The scheduler picks it up
    /// on its first tick.
    pub fn start_init(&self, shell: Entry) -> SysResult<Pid> {
        let pid = {
            let mut state = self.lock();
            let pid = state
                .procs
                .allocate(PID_INVALID, "init".to_string(), vec!["init".to_string()])
                .ok_or(Errno::OutOfMemory)?;
            if let Some(pcb) = state.procs.get_mut(pid) {
                pcb.prio = 0;
            }
            state.log_event(Event::Create, pid);
            pid
        };

        let kernel = self.clone();
        let worker = Worker::spawn("init", move |handle| {
            let proc = Process::new(kernel, pid, handle);
            init_main(&proc, shell);
        })
        .map_err(|err| {
            tracing::error!(%err, "cannot start init worker");
            Errno::ThreadCreate
        })?;

        let mut state = self.lock();
        if let Some(pcb) = state.procs.get_mut(pid) {
            pcb.worker = Some(worker);
        }
        state.enqueue(pid);
        Ok(pid)
    }
}

fn spawn_shell(proc: &Process, shell: Entry) -> SysResult<Pid> {
    let pid = proc.spawn(shell, vec!["shell".to_string()], Redirect::none())?;
    // The shell is interactive; it runs at the highest priority.
    proc.nice(pid, 0)?;
    Ok(pid)
}

fn init_main(proc: &Process, shell: Entry) {
    let mut shell_pid = match spawn_shell(proc, shell) {
        Ok(pid) => pid,
        Err(_) => {
            proc.perror("init: failed to spawn shell");
            proc.exit();
        }
    };

    loop {
        if proc.kernel().shutdown_requested() {
            proc.exit();
        }

        let waited = proc.waitpid(None, false);

        if proc.kernel().shutdown_requested() {
            proc.exit();
        }

        // Orphans are reaped by waitpid itself; only a dead shell needs
        // action: restart it for crash recovery.
        if let Ok(Some((pid, _status))) = waited
            && pid == shell_pid
        {
            match spawn_shell(proc, shell) {
                Ok(pid) => shell_pid = pid,
                Err(_) => {
                    proc.perror("init: failed to restart shell");
                    proc.exit();
                }
            }
        }
    }
}

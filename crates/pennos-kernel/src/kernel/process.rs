//! Process lifecycle: creation, termination, orphan adoption, reaping, and
//! guest-signal delivery.

use super::KernelState;
use crate::log::Event;
use crate::pcb::{PID_INIT, Pcb, Pid, ProcState};
use crate::signal::Signal;
use crate::worker::WorkerHandle;

impl KernelState {
    /// Allocate a PCB under `ppid`, inheriting the parent's descriptor table
    /// (the standard streams in particular), and log its creation.
    pub(crate) fn create_process(
        &mut self,
        ppid: Pid,
        cmd_name: String,
        args: Vec<String>,
    ) -> Option<Pid> {
        let pid = self.procs.allocate(ppid, cmd_name, args)?;
        if let Some(parent) = self.procs.get_mut(ppid) {
            parent.children.push(pid);
            let fd_table = parent.fd_table;
            if let Some(child) = self.procs.get_mut(pid) {
                child.fd_table = fd_table;
            }
        }
        self.log_event(Event::Create, pid);
        Some(pid)
    }

    /// Transition a process to zombie: it leaves every queue, its children
    /// are re-parented to init before anything else can observe them, and a
    /// parent blocked in an event wait wakes up. Returns the worker handle
    /// to cancel when the termination came from a signal.
    pub(crate) fn terminate(&mut self, pid: Pid) -> Option<WorkerHandle> {
        let pcb = self.procs.get(pid)?;
        if pcb.state == ProcState::Zombie {
            return None;
        }
        let signaled = pcb.exit_kind == crate::pcb::ExitKind::Signaled;
        let ppid = pcb.ppid;
        let cancel = if signaled {
            self.log_event(Event::Signaled, pid);
            self.procs
                .get(pid)
                .and_then(|pcb| pcb.worker.as_ref())
                .map(|worker| worker.handle())
        } else {
            None
        };

        self.remove_from_queues(pid);
        if let Some(pcb) = self.procs.get_mut(pid) {
            pcb.state = ProcState::Zombie;
        }
        self.log_event(Event::Zombie, pid);

        if pid != PID_INIT {
            self.adopt_orphans(pid);
        }
        self.wake_event_waiter(ppid);
        cancel
    }

    /// Re-parent every child of `pid` to init. Performed at the moment the
    /// parent becomes zombie so a just-created zombie never dangles; init is
    /// woken when it inherits one.
    pub(crate) fn adopt_orphans(&mut self, pid: Pid) {
        let children = match self.procs.get_mut(pid) {
            Some(pcb) => std::mem::take(&mut pcb.children),
            None => return,
        };
        let mut adopted_zombie = false;
        for child in children {
            if let Some(pcb) = self.procs.get_mut(child) {
                pcb.ppid = PID_INIT;
                adopted_zombie |= pcb.state == ProcState::Zombie;
            }
            if let Some(init) = self.procs.get_mut(PID_INIT) {
                init.children.push(child);
            }
            self.log_event(Event::Orphan, child);
        }
        if adopted_zombie {
            self.wake_event_waiter(PID_INIT);
        }
    }

    /// Remove a zombie child from its parent and the process table. The
    /// caller joins the worker outside the kernel lock.
    pub(crate) fn reap(&mut self, parent: Pid, child: Pid) -> Option<Pcb> {
        if let Some(pcb) = self.procs.get_mut(parent) {
            pcb.children.retain(|&c| c != child);
        }
        self.log_event(Event::Waited, child);
        self.procs.remove(child)
    }

    /// Synchronous state transform for a guest signal. Returns the worker
    /// handle to cancel when the signal terminated the target.
    pub(crate) fn deliver_signal(&mut self, pid: Pid, signal: Signal) -> Option<WorkerHandle> {
        let state = self.procs.get(pid)?.state;
        match signal {
            Signal::Term => {
                if state != ProcState::Zombie {
                    if let Some(pcb) = self.procs.get_mut(pid) {
                        pcb.exit_kind = crate::pcb::ExitKind::Signaled;
                    }
                    return self.terminate(pid);
                }
                None
            }
            Signal::Stop => {
                if state != ProcState::Zombie {
                    self.stop_process(pid);
                }
                None
            }
            Signal::Cont => {
                self.continue_process(pid);
                None
            }
            // Child state changes are observed by waitpid directly.
            Signal::Chld => None,
        }
    }
}

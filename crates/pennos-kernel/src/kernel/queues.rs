//! Ready-queue and blocked-queue operations.
//!
//! A PCB is in at most one queue at any time: one ready queue while READY,
//! the blocked queue while BLOCKED, and none while RUNNING, STOPPED, or
//! ZOMBIE.

use super::KernelState;
use crate::log::Event;
use crate::pcb::{NUM_PRIO, Pid, ProcState};

impl KernelState {
    pub(crate) fn log_event(&mut self, event: Event, pid: Pid) {
        let Some(pcb) = self.procs.get(pid) else {
            return;
        };
        let (prio, cmd) = (pcb.prio, pcb.cmd_name.clone());
        self.log.event(self.tick, event, pid, prio, &cmd);
    }

    /// Append a READY process to the tail of its priority queue.
    pub(crate) fn enqueue(&mut self, pid: Pid) {
        let Some(pcb) = self.procs.get(pid) else {
            return;
        };
        if pcb.state != ProcState::Ready || pcb.prio as usize >= NUM_PRIO {
            return;
        }
        self.ready[pcb.prio as usize].push_back(pid);
    }

    pub(crate) fn dequeue(&mut self, prio: usize) -> Option<Pid> {
        self.ready.get_mut(prio)?.pop_front()
    }

    pub(crate) fn ready_empty(&self, prio: usize) -> bool {
        self.ready[prio].is_empty()
    }

    /// Move a process into the blocked queue. The caller sets `wake_tick`
    /// first: non-zero for a timed sleep, zero for an event wait.
    pub(crate) fn block(&mut self, pid: Pid) {
        let Some(pcb) = self.procs.get_mut(pid) else {
            return;
        };
        let prio = pcb.prio as usize;
        pcb.state = ProcState::Blocked;
        self.ready[prio].retain(|&p| p != pid);
        if !self.blocked.contains(&pid) {
            self.blocked.push(pid);
        }
        self.log_event(Event::Blocked, pid);
    }

    pub(crate) fn unblock(&mut self, pid: Pid) {
        self.blocked.retain(|&p| p != pid);
        let Some(pcb) = self.procs.get_mut(pid) else {
            return;
        };
        pcb.state = ProcState::Ready;
        self.enqueue(pid);
        self.log_event(Event::Unblocked, pid);
    }

    /// Stop a process: it leaves every queue and will not be scheduled until
    /// continued. A parent blocked in an event wait is woken so it can
    /// observe the stop.
    pub(crate) fn stop_process(&mut self, pid: Pid) {
        let Some(pcb) = self.procs.get_mut(pid) else {
            return;
        };
        let (prio, ppid) = (pcb.prio as usize, pcb.ppid);
        pcb.state = ProcState::Stopped;
        pcb.stopped_reported = false;
        self.ready[prio].retain(|&p| p != pid);
        // A stopped sleeper must not be woken by the sleep pass.
        self.blocked.retain(|&p| p != pid);
        self.wake_event_waiter(ppid);
        self.log_event(Event::Stopped, pid);
    }

    pub(crate) fn continue_process(&mut self, pid: Pid) {
        let Some(pcb) = self.procs.get_mut(pid) else {
            return;
        };
        if pcb.state != ProcState::Stopped {
            return;
        }
        pcb.state = ProcState::Ready;
        self.enqueue(pid);
        self.log_event(Event::Continued, pid);
    }

    /// Wake every timed sleeper whose wake tick has arrived.
    pub(crate) fn tick_sleep_check(&mut self) {
        let due: Vec<Pid> = self
            .blocked
            .iter()
            .copied()
            .filter(|&pid| {
                self.procs
                    .get(pid)
                    .is_some_and(|pcb| pcb.wake_tick > 0 && pcb.wake_tick <= self.tick)
            })
            .collect();
        for pid in due {
            if let Some(pcb) = self.procs.get_mut(pid) {
                pcb.wake_tick = 0;
            }
            self.unblock(pid);
        }
    }

    /// Change a process's priority, repositioning it if it sits in a ready
    /// queue, and log the NICE transition.
    pub(crate) fn set_priority(&mut self, pid: Pid, prio: u8) {
        let Some(pcb) = self.procs.get_mut(pid) else {
            return;
        };
        if prio as usize >= NUM_PRIO || pcb.prio == prio {
            return;
        }
        let old_prio = pcb.prio;
        pcb.prio = prio;
        let (state, cmd) = (pcb.state, pcb.cmd_name.clone());
        self.log.nice(self.tick, pid, old_prio, prio, &cmd);
        if state == ProcState::Ready {
            self.ready[old_prio as usize].retain(|&p| p != pid);
            self.enqueue(pid);
        }
    }

    pub(crate) fn remove_from_queues(&mut self, pid: Pid) {
        for queue in &mut self.ready {
            queue.retain(|&p| p != pid);
        }
        self.blocked.retain(|&p| p != pid);
    }

    /// Wake `pid` if it is blocked waiting on an event (wake_tick == 0), as
    /// opposed to a timed sleep.
    pub(crate) fn wake_event_waiter(&mut self, pid: Pid) {
        if self
            .procs
            .get(pid)
            .is_some_and(|pcb| pcb.state == ProcState::Blocked && pcb.wake_tick == 0)
        {
            self.unblock(pid);
        }
    }
}

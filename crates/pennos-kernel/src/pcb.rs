use crate::worker::Worker;

pub type Pid = u16;

/// PID 0 is never a real process.
pub const PID_INVALID: Pid = 0;
/// Init: adopts orphans and respawns the shell.
pub const PID_INIT: Pid = 1;

pub const MAX_PROC: usize = 1024;
/// Per-process descriptor table size.
pub const MAX_FD: usize = 32;
pub const NUM_PRIO: usize = 3;

/// Priority a fresh process spawns at.
pub const DEFAULT_PRIO: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Ready,
    Running,
    Blocked,
    Stopped,
    Zombie,
}

impl ProcState {
    /// Single-letter code used by `ps`.
    pub fn code(self) -> char {
        match self {
            ProcState::Ready => 'R',
            ProcState::Running => 'R',
            ProcState::Blocked => 'B',
            ProcState::Stopped => 'S',
            ProcState::Zombie => 'Z',
        }
    }
}

/// How (whether) a process has terminated or changed state for waitpid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    None,
    Exited,
    Signaled,
    Stopped,
}

/// A process control block.
///
/// Children are recorded by PID; the parent back-reference is `ppid`. The
/// per-process descriptor table maps local fds to kernel fds (`None` means
/// closed); slots 0..=2 start out mapped to the reserved kernel streams.
pub struct Pcb {
    pub pid: Pid,
    pub ppid: Pid,
    pub state: ProcState,
    pub prio: u8,
    /// Non-zero: tick at which a timed sleep ends. Zero: not sleeping (a
    /// blocked process with `wake_tick == 0` waits on an event, not time).
    pub wake_tick: u64,
    /// Makes waitpid's view of a stop edge-triggered.
    pub stopped_reported: bool,
    pub exit_kind: ExitKind,
    pub children: Vec<Pid>,
    pub fd_table: [Option<usize>; MAX_FD],
    pub cmd_name: String,
    pub args: Vec<String>,
    pub worker: Option<Worker>,
}

impl Pcb {
    pub fn new(pid: Pid, ppid: Pid, cmd_name: String, args: Vec<String>) -> Self {
        let mut fd_table = [None; MAX_FD];
        fd_table[0] = Some(pennfat::STDIN_FD);
        fd_table[1] = Some(pennfat::STDOUT_FD);
        fd_table[2] = Some(pennfat::STDERR_FD);
        Self {
            pid,
            ppid,
            state: ProcState::Ready,
            prio: DEFAULT_PRIO,
            wake_tick: 0,
            stopped_reported: false,
            exit_kind: ExitKind::None,
            children: Vec::new(),
            fd_table,
            cmd_name,
            args,
            worker: None,
        }
    }

    /// First free local descriptor at or above 3.
    pub fn free_fd(&self) -> Option<usize> {
        (3..MAX_FD).find(|&fd| self.fd_table[fd].is_none())
    }
}

/// The process table, indexed by PID. `next_pid` is monotonic; PIDs are not
/// recycled within one boot.
pub struct ProcessTable {
    slots: Vec<Option<Pcb>>,
    next_pid: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROC);
        slots.resize_with(MAX_PROC, || None);
        Self { slots, next_pid: PID_INIT }
    }

    /// Allocate the next PID, or `None` once the monotonic counter has used
    /// up the table.
    pub fn allocate(&mut self, ppid: Pid, cmd_name: String, args: Vec<String>) -> Option<Pid> {
        if (self.next_pid as usize) >= MAX_PROC {
            return None;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.slots[pid as usize] = Some(Pcb::new(pid, ppid, cmd_name, args));
        Some(pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Pcb> {
        self.slots.get_mut(pid as usize).and_then(Option::take)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.slots
            .iter()
            .flatten()
            .map(|pcb| pcb.pid)
            .collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_monotonic_from_init() {
        let mut table = ProcessTable::new();
        let init = table.allocate(PID_INVALID, "init".into(), vec![]).unwrap();
        assert_eq!(init, PID_INIT);
        let next = table.allocate(init, "shell".into(), vec![]).unwrap();
        assert_eq!(next, 2);
        table.remove(next);
        // No recycling within a boot.
        assert_eq!(table.allocate(init, "x".into(), vec![]).unwrap(), 3);
    }

    #[test]
    fn allocation_fails_when_the_counter_is_spent() {
        let mut table = ProcessTable::new();
        while table.allocate(PID_INIT, "p".into(), vec![]).is_some() {}
        assert!(table.allocate(PID_INIT, "p".into(), vec![]).is_none());
        assert_eq!(table.pids().len(), MAX_PROC - 1);
    }

    #[test]
    fn fresh_pcb_maps_standard_streams() {
        let pcb = Pcb::new(2, 1, "p".into(), vec![]);
        assert_eq!(pcb.fd_table[0], Some(pennfat::STDIN_FD));
        assert_eq!(pcb.fd_table[1], Some(pennfat::STDOUT_FD));
        assert_eq!(pcb.fd_table[2], Some(pennfat::STDERR_FD));
        assert_eq!(pcb.free_fd(), Some(3));
        assert_eq!(pcb.prio, DEFAULT_PRIO);
    }
}

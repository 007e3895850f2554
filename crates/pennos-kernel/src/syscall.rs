//! The user-level system-call surface.
//!
//! A [`Process`] handle binds the shared kernel to one PID and its worker;
//! user programs receive one and interact with the OS through it only.
//! Every call releases the kernel lock before hitting a preemption point,
//! so a quantum can end at any syscall boundary.

use std::io::{Read, Write};
use std::path::Path;

use pennfat::{COPY_BUFFER_SIZE, FatFs, FsResult, OpenMode, Whence};

use crate::errno::{Errno, SysResult};
use crate::kernel::{Kernel, ProcessInfo};
use crate::log::Event;
use crate::pcb::{ExitKind, MAX_FD, NUM_PRIO, Pid, ProcState};
use crate::signal::{Signal, WaitStatus};
use crate::worker::{Worker, WorkerHandle};

/// Entry point of a guest program.
pub type Entry = fn(&Process);

/// Spawn-time stdin/stdout redirection.
#[derive(Debug, Clone, Default)]
pub struct Redirect {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    /// Append to (rather than truncate) the stdout target.
    pub append: bool,
}

impl Redirect {
    pub fn none() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none()
    }
}

/// A running process's view of the OS.
#[derive(Clone)]
pub struct Process {
    kernel: Kernel,
    pid: Pid,
    worker: WorkerHandle,
}

impl Process {
    pub(crate) fn new(kernel: Kernel, pid: Pid, worker: WorkerHandle) -> Self {
        Self {
            kernel,
            pid,
            worker,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// The argv this process was spawned with (argv[0] is the command name).
    pub fn args(&self) -> Vec<String> {
        self.kernel
            .lock()
            .procs
            .get(self.pid)
            .map(|pcb| pcb.args.clone())
            .unwrap_or_default()
    }

    /// Explicit preemption point for compute loops.
    pub fn yield_now(&self) {
        self.worker.checkpoint();
    }

    /// Record a failure as the last error and pass a preemption point.
    fn finish<T>(&self, result: SysResult<T>) -> SysResult<T> {
        if let Err(errno) = &result {
            self.kernel.lock().last_errno = Some(*errno);
        }
        self.worker.checkpoint();
        result
    }

    // ---- process management -------------------------------------------------

    /// Create a child process running `entry` with a deep-copied argv. With
    /// redirections, the child opens its stdout target first, then stdin,
    /// and restores both through a cleanup guard on any exit path.
    pub fn spawn(&self, entry: Entry, argv: Vec<String>, redirect: Redirect) -> SysResult<Pid> {
        let result = self.spawn_inner(entry, argv, redirect);
        self.finish(result)
    }

    fn spawn_inner(&self, entry: Entry, argv: Vec<String>, redirect: Redirect) -> SysResult<Pid> {
        let cmd_name = argv
            .first()
            .cloned()
            .unwrap_or_else(|| "<unknown>".to_string());
        let child = self
            .kernel
            .lock()
            .create_process(self.pid, cmd_name.clone(), argv)
            .ok_or(Errno::OutOfMemory)?;

        let kernel = self.kernel.clone();
        let worker = Worker::spawn(&cmd_name, move |handle| {
            let proc = Process::new(kernel, child, handle);
            run_process(&proc, entry, redirect);
        });
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                tracing::error!(%err, "worker creation failed");
                let mut state = self.kernel.lock();
                if let Some(parent) = state.procs.get_mut(self.pid) {
                    parent.children.retain(|&c| c != child);
                }
                state.procs.remove(child);
                return Err(Errno::ThreadCreate);
            }
        };

        let mut state = self.kernel.lock();
        if let Some(pcb) = state.procs.get_mut(child) {
            pcb.worker = Some(worker);
            pcb.state = ProcState::Ready;
        }
        state.enqueue(child);
        Ok(child)
    }

    /// Wait for a child (`None` = any) to change state.
    ///
    /// Zombies are reaped and reported with their exit kind; a stop is
    /// reported exactly once per stop transition. With `nohang` the call
    /// returns `Ok(None)` instead of blocking.
    pub fn waitpid(
        &self,
        pid: Option<Pid>,
        nohang: bool,
    ) -> SysResult<Option<(Pid, WaitStatus)>> {
        enum Step {
            Done(Pid, WaitStatus, Option<Worker>),
            Fail(Errno),
            NoHang,
            Wait,
        }

        loop {
            let step = {
                let mut state = self.kernel.lock();
                match state.procs.get(self.pid).map(|p| p.children.clone()) {
                    None => Step::Fail(Errno::NoSuchProcess),
                    Some(children) if children.is_empty() => Step::Fail(Errno::NoChild),
                    Some(children) => {
                        let mut step = if nohang { Step::NoHang } else { Step::Wait };
                        for child in children {
                            if pid.is_some_and(|want| want != child) {
                                continue;
                            }
                            let Some(pcb) = state.procs.get(child) else {
                                continue;
                            };
                            match pcb.state {
                                ProcState::Zombie => {
                                    let status = match pcb.exit_kind {
                                        ExitKind::Signaled => WaitStatus::Signaled,
                                        ExitKind::Stopped => WaitStatus::Stopped,
                                        _ => WaitStatus::Exited,
                                    };
                                    let mut reaped = state.reap(self.pid, child);
                                    let worker =
                                        reaped.as_mut().and_then(|pcb| pcb.worker.take());
                                    step = Step::Done(child, status, worker);
                                    break;
                                }
                                ProcState::Stopped => {
                                    if !pcb.stopped_reported {
                                        if let Some(pcb) = state.procs.get_mut(child) {
                                            pcb.stopped_reported = true;
                                        }
                                        step = Step::Done(child, WaitStatus::Stopped, None);
                                        break;
                                    }
                                }
                                _ => {}
                            }
                        }

                        if matches!(step, Step::Wait) {
                            if let Some(pcb) = state.procs.get_mut(self.pid) {
                                pcb.wake_tick = 0;
                            }
                            state.block(self.pid);
                        }
                        step
                    }
                }
            };

            match step {
                Step::Done(child, status, worker) => {
                    // The reaped worker finished (or is unwinding after a
                    // cancel); join it with the kernel unlocked so its
                    // cleanup guards can still make syscalls.
                    if let Some(mut worker) = worker {
                        worker.join();
                    }
                    return self.finish(Ok(Some((child, status))));
                }
                Step::Fail(errno) => return self.finish(Err(errno)),
                Step::NoHang => return self.finish(Ok(None)),
                Step::Wait => self.worker.suspend_self(),
            }
        }
    }

    /// Send a guest signal. Init refuses all of them.
    pub fn kill(&self, pid: Pid, signal: Signal) -> SysResult<()> {
        let result = self.kernel.send_signal(pid, signal);
        self.finish(result)
    }

    /// Terminate the calling process. Never returns; cleanup guards on the
    /// worker's stack run on the way out.
    pub fn exit(&self) -> ! {
        self.mark_exited();
        self.worker.exit_self()
    }

    /// Zombie transition for a normal exit. Used by [`Process::exit`] and by
    /// the trampoline when an entry function returns.
    fn mark_exited(&self) {
        let mut state = self.kernel.lock();
        let already_zombie = state
            .procs
            .get(self.pid)
            .is_none_or(|pcb| pcb.state == ProcState::Zombie);
        if already_zombie {
            return;
        }
        if let Some(pcb) = state.procs.get_mut(self.pid) {
            pcb.exit_kind = ExitKind::Exited;
        }
        state.log_event(Event::Exited, self.pid);
        state.terminate(self.pid);
    }

    /// Change a process's priority (0..=2), repositioning it in the ready
    /// queues when needed.
    pub fn nice(&self, pid: Pid, prio: u8) -> SysResult<()> {
        let result = (|| {
            if prio as usize >= NUM_PRIO {
                return Err(Errno::InvalidArgument);
            }
            let mut state = self.kernel.lock();
            if state.procs.get(pid).is_none() {
                return Err(Errno::NoSuchProcess);
            }
            state.set_priority(pid, prio);
            Ok(())
        })();
        self.finish(result)
    }

    /// Block for `ticks` quanta. Stop/continue does not end the sleep early;
    /// termination does.
    pub fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            self.worker.checkpoint();
            return;
        }
        {
            let mut state = self.kernel.lock();
            let wake = state.tick + ticks;
            if let Some(pcb) = state.procs.get_mut(self.pid) {
                pcb.wake_tick = wake;
            }
        }
        loop {
            let asleep = {
                let mut state = self.kernel.lock();
                let now = state.tick;
                let pending = state
                    .procs
                    .get(self.pid)
                    .is_some_and(|pcb| pcb.wake_tick > 0 && now < pcb.wake_tick);
                if pending {
                    state.block(self.pid);
                }
                pending
            };
            if !asleep {
                break;
            }
            self.worker.suspend_self();
        }
        self.worker.checkpoint();
    }

    pub fn getpid(&self) -> Pid {
        self.pid
    }

    /// Snapshot of every live process, for `ps`.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.kernel.processes()
    }

    /// Set the global shutdown flag observed by init and the scheduler.
    pub fn shutdown(&self) {
        let _ = self.write(2, b"Shutdown requested. PennOS will terminate.\n");
        self.kernel.request_shutdown();
    }

    /// Hand the terminal to a process (or to nobody); host signals are
    /// relayed to it.
    pub fn set_terminal_foreground(&self, pid: Option<Pid>) {
        self.kernel.set_foreground(pid);
    }

    /// Format the last error like `perror`, onto this process's stderr.
    pub fn perror(&self, msg: &str) {
        let err = self
            .kernel
            .last_errno()
            .map(|errno| errno.to_string())
            .unwrap_or_else(|| "no error".to_string());
        let line = if msg.is_empty() {
            format!("{err}\n")
        } else {
            format!("{msg}: {err}\n")
        };
        let _ = self.write(2, line.as_bytes());
    }

    // ---- filesystem --------------------------------------------------------

    /// Map a local descriptor to its kernel descriptor.
    fn kernel_fd(&self, fd: usize) -> SysResult<usize> {
        if fd >= MAX_FD {
            return Err(Errno::BadDescriptor);
        }
        self.kernel
            .lock()
            .procs
            .get(self.pid)
            .and_then(|pcb| pcb.fd_table[fd])
            .ok_or(Errno::BadDescriptor)
    }

    /// Run an FS operation against the mounted volume.
    fn with_fs<T>(&self, op: impl FnOnce(&mut FatFs) -> FsResult<T>) -> SysResult<T> {
        let result = {
            let mut state = self.kernel.lock();
            state
                .fs
                .as_mut()
                .ok_or(Errno::NotMounted)
                .and_then(|fs| op(fs).map_err(Errno::from))
        };
        self.finish(result)
    }

    /// Open a file into the lowest free local descriptor (>= 3).
    pub fn open(&self, name: &str, mode: OpenMode) -> SysResult<usize> {
        let result = (|| {
            let mut state = self.kernel.lock();
            let state = &mut *state;
            let pcb = state
                .procs
                .get_mut(self.pid)
                .ok_or(Errno::NoSuchProcess)?;
            let local = pcb.free_fd().ok_or(Errno::TooManyOpen)?;
            let fs = state.fs.as_mut().ok_or(Errno::NotMounted)?;
            let kfd = fs.open(name, mode).map_err(Errno::from)?;
            pcb.fd_table[local] = Some(kfd);
            Ok(local)
        })();
        self.finish(result)
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> SysResult<usize> {
        let result = (|| {
            let kfd = self.kernel_fd(fd)?;
            if kfd == pennfat::STDIN_FD {
                // Host stdin may block indefinitely; never hold the kernel
                // lock across it.
                return std::io::stdin().read(buf).map_err(|_| Errno::Io);
            }
            let mut state = self.kernel.lock();
            let fs = state.fs.as_mut().ok_or(Errno::NotMounted)?;
            fs.read(kfd, buf).map_err(Errno::from)
        })();
        self.finish(result)
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> SysResult<usize> {
        let result = (|| {
            let kfd = self.kernel_fd(fd)?;
            if kfd == pennfat::STDOUT_FD || kfd == pennfat::STDERR_FD {
                let written = if kfd == pennfat::STDOUT_FD {
                    let mut out = std::io::stdout();
                    out.write_all(buf).and_then(|_| out.flush())
                } else {
                    let mut err = std::io::stderr();
                    err.write_all(buf).and_then(|_| err.flush())
                };
                return written.map(|_| buf.len()).map_err(|_| Errno::Io);
            }
            let mut state = self.kernel.lock();
            let fs = state.fs.as_mut().ok_or(Errno::NotMounted)?;
            fs.write(kfd, buf).map_err(Errno::from)
        })();
        self.finish(result)
    }

    pub fn close(&self, fd: usize) -> SysResult<()> {
        let result = (|| {
            if fd >= MAX_FD {
                return Err(Errno::BadDescriptor);
            }
            let mut state = self.kernel.lock();
            let state = &mut *state;
            let pcb = state
                .procs
                .get_mut(self.pid)
                .ok_or(Errno::NoSuchProcess)?;
            let kfd = pcb.fd_table[fd].ok_or(Errno::BadDescriptor)?;
            if kfd > pennfat::STDERR_FD {
                let fs = state.fs.as_mut().ok_or(Errno::NotMounted)?;
                fs.close(kfd).map_err(Errno::from)?;
            }
            pcb.fd_table[fd] = None;
            Ok(())
        })();
        self.finish(result)
    }

    pub fn lseek(&self, fd: usize, offset: i64, whence: Whence) -> SysResult<u64> {
        let kfd = match self.kernel_fd(fd) {
            Ok(kfd) => kfd,
            Err(errno) => return self.finish(Err(errno)),
        };
        self.with_fs(|fs| fs.lseek(kfd, offset, whence))
    }

    pub fn unlink(&self, name: &str) -> SysResult<()> {
        self.with_fs(|fs| fs.unlink(name))
    }

    pub fn rename(&self, src: &str, dest: &str) -> SysResult<()> {
        self.with_fs(|fs| fs.rename(src, dest))
    }

    pub fn chmod(&self, name: &str, op: u8) -> SysResult<()> {
        self.with_fs(|fs| fs.chmod(name, op))
    }

    pub fn check_executable(&self, name: &str) -> SysResult<()> {
        self.with_fs(|fs| fs.check_executable(name))
    }

    /// `cp SRC DST`, both on the mounted volume.
    pub fn copy_within(&self, src: &str, dest: &str) -> SysResult<()> {
        self.with_fs(|fs| fs.copy_fat_to_fat(src, dest))
    }

    /// `cp -h SRC DST`: host file onto the volume.
    pub fn copy_from_host(&self, src: &Path, dest: &str) -> SysResult<()> {
        self.with_fs(|fs| fs.copy_host_to_fat(src, dest))
    }

    /// `cp SRC -h DST`: volume file out to the host.
    pub fn copy_to_host(&self, src: &str, dest: &Path) -> SysResult<()> {
        self.with_fs(|fs| fs.copy_fat_to_host(src, dest))
    }

    /// List the root directory (or one entry) onto this process's stdout,
    /// honoring redirection.
    pub fn ls(&self, name: Option<&str>) -> SysResult<()> {
        let entries = self.with_fs(|fs| fs.scan_dir(name))?;
        for entry in entries {
            let line = format!("{}\n", entry.format_line());
            self.write(1, line.as_bytes())?;
        }
        Ok(())
    }

    /// `cat` over this process's own descriptors: inputs stream to local fd
    /// 1, stdin is the fallback input. A missing input is reported but does
    /// not stop the remaining ones.
    pub fn cat(&self, inputs: &[String]) -> SysResult<()> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        if inputs.is_empty() {
            loop {
                let n = self.read(0, &mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                if self.write(1, &buf[..n])? != n {
                    return self.finish(Err(Errno::Io));
                }
            }
        }

        let mut result = Ok(());
        for name in inputs {
            let fd = match self.open(name, OpenMode::READ) {
                Ok(fd) => fd,
                Err(errno) => {
                    if result.is_ok() {
                        result = Err(errno);
                    }
                    continue;
                }
            };
            loop {
                match self.read(fd, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if self.write(1, &buf[..n])? != n {
                            result = Err(Errno::Io);
                            break;
                        }
                    }
                    Err(errno) => {
                        result = Err(errno);
                        break;
                    }
                }
            }
            self.close(fd)?;
        }
        result
    }
}

/// Worker trampoline: apply redirection, run the entry, and make sure the
/// process ends up a zombie even when the entry just returns.
fn run_process(proc: &Process, entry: Entry, redirect: Redirect) {
    if redirect.is_empty() {
        entry(proc);
    } else {
        match RedirectGuard::apply(proc, &redirect) {
            Ok(_guard) => entry(proc),
            Err(errno) => {
                proc.kernel.lock().last_errno = Some(errno);
                let target = redirect
                    .stdout
                    .as_deref()
                    .or(redirect.stdin.as_deref())
                    .unwrap_or("");
                proc.perror(target);
            }
        }
    }
    proc.mark_exited();
}

/// Restores the redirected descriptor slots on drop — the cleanup handler
/// that must run no matter how the process ends, including cancellation.
struct RedirectGuard<'a> {
    proc: &'a Process,
    saved_stdin: Option<Option<usize>>,
    saved_stdout: Option<Option<usize>>,
}

impl<'a> RedirectGuard<'a> {
    fn apply(proc: &'a Process, redirect: &Redirect) -> SysResult<RedirectGuard<'a>> {
        if let (Some(input), Some(output)) = (&redirect.stdin, &redirect.stdout)
            && redirect.append
            && input == output
        {
            let _ = proc.write(
                2,
                b"error: input and output cannot be the same file in append mode\n",
            );
            return Err(Errno::InvalidArgument);
        }

        let mut guard = RedirectGuard {
            proc,
            saved_stdin: None,
            saved_stdout: None,
        };
        // stdout first, so a truncate target exists before stdin opens.
        if let Some(output) = &redirect.stdout {
            let mode = if redirect.append {
                OpenMode::APPEND
            } else {
                OpenMode::WRITE
            };
            let fd = proc.open(output, mode)?;
            guard.saved_stdout = Some(proc.replace_slot(1, fd));
        }
        if let Some(input) = &redirect.stdin {
            let fd = proc.open(input, OpenMode::READ)?;
            guard.saved_stdin = Some(proc.replace_slot(0, fd));
        }
        Ok(guard)
    }
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved_stdin.take() {
            self.proc.restore_slot(0, saved);
        }
        if let Some(saved) = self.saved_stdout.take() {
            self.proc.restore_slot(1, saved);
        }
    }
}

impl Process {
    /// Move the kernel descriptor at local `from` into `slot`, returning the
    /// slot's previous mapping.
    fn replace_slot(&self, slot: usize, from: usize) -> Option<usize> {
        let mut state = self.kernel.lock();
        let Some(pcb) = state.procs.get_mut(self.pid) else {
            return None;
        };
        let old = pcb.fd_table[slot];
        pcb.fd_table[slot] = pcb.fd_table[from].take();
        old
    }

    /// Close whatever `slot` currently maps to (unless it is the saved
    /// mapping or a reserved stream) and restore the saved mapping.
    fn restore_slot(&self, slot: usize, saved: Option<usize>) {
        let mut state = self.kernel.lock();
        let state = &mut *state;
        let Some(pcb) = state.procs.get_mut(self.pid) else {
            return;
        };
        let current = pcb.fd_table[slot];
        pcb.fd_table[slot] = saved;
        if let Some(kfd) = current
            && current != saved
            && kfd > pennfat::STDERR_FD
            && let Some(fs) = state.fs.as_mut()
        {
            let _ = fs.close(kfd);
        }
    }
}

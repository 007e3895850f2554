use std::path::Path;
use std::time::Duration;

use crate::errno::Errno;
use crate::host::HostSignals;
use crate::kernel::Kernel;
use crate::scheduler::{QUANTUM, Scheduler};
use crate::syscall::Entry;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("cannot mount filesystem: {0}")]
    Mount(#[from] pennfat::FsError),
    #[error("cannot start init: {0}")]
    Init(Errno),
}

/// Everything needed to bring the OS up.
pub struct BootConfig<'a> {
    pub image: &'a Path,
    pub log_path: Option<&'a Path>,
    /// One scheduling tick. [`QUANTUM`] outside of tests.
    pub quantum: Duration,
    /// Entry point init spawns (and respawns) as the shell.
    pub shell: Entry,
    /// Whether to catch host SIGINT/SIGTSTP/SIGQUIT for the relay. Tests
    /// leave this off.
    pub host_signals: bool,
}

impl<'a> BootConfig<'a> {
    pub fn new(image: &'a Path, shell: Entry) -> Self {
        Self {
            image,
            log_path: None,
            quantum: QUANTUM,
            shell,
            host_signals: true,
        }
    }
}

/// Mount, start init, and run the scheduler until shutdown; then cancel
/// every remaining worker and unmount.
///
/// A mount failure is the only fatal boot error the caller must map to a
/// non-zero exit.
pub fn boot(config: BootConfig<'_>) -> Result<(), BootError> {
    let kernel = Kernel::new(config.log_path);
    kernel.mount(config.image)?;
    kernel.start_init(config.shell).map_err(BootError::Init)?;

    let mut scheduler = Scheduler::new(kernel.clone(), config.quantum);
    if config.host_signals {
        match HostSignals::install() {
            Ok(signals) => scheduler.set_host_signals(signals),
            Err(err) => tracing::warn!(%err, "host signal relay unavailable"),
        }
    }
    scheduler.run();

    kernel.kill_all();
    if let Err(err) = kernel.unmount() {
        tracing::warn!(%err, "unmount failed on shutdown");
    }
    Ok(())
}

//! Deferral of host signals into the scheduler loop.
//!
//! The handlers only set atomic flags (nothing else is async-signal-safe
//! here); the scheduler polls between quanta and relays the event to the
//! terminal-foreground process as a guest signal.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTSTP};

/// A host event awaiting relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Ctrl-C: becomes a guest terminate.
    Interrupt,
    /// Ctrl-Z: becomes a guest stop.
    Stop,
}

pub struct HostSignals {
    interrupt: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    quit: Arc<AtomicBool>,
}

impl HostSignals {
    /// Register flag-only handlers for SIGINT, SIGTSTP, and SIGQUIT.
    pub fn install() -> io::Result<Self> {
        let interrupt = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let quit = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGINT, Arc::clone(&interrupt))?;
        signal_hook::flag::register(SIGTSTP, Arc::clone(&stop))?;
        signal_hook::flag::register(SIGQUIT, Arc::clone(&quit))?;
        Ok(Self {
            interrupt,
            stop,
            quit,
        })
    }

    /// Drain the pending event, if any. SIGQUIT is caught so it cannot kill
    /// the host process, but it has no guest mapping.
    pub fn take(&self) -> Option<HostEvent> {
        self.quit.swap(false, Ordering::SeqCst);
        if self.interrupt.swap(false, Ordering::SeqCst) {
            return Some(HostEvent::Interrupt);
        }
        if self.stop.swap(false, Ordering::SeqCst) {
            return Some(HostEvent::Stop);
        }
        None
    }
}

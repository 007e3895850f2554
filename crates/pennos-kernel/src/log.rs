use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Scheduler and lifecycle events, one log line each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Create,
    Schedule,
    Blocked,
    Unblocked,
    Stopped,
    Continued,
    Zombie,
    Exited,
    Signaled,
    Orphan,
    Waited,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Event::Create => "CREATE",
            Event::Schedule => "SCHEDULE",
            Event::Blocked => "BLOCKED",
            Event::Unblocked => "UNBLOCKED",
            Event::Stopped => "STOPPED",
            Event::Continued => "CONTINUED",
            Event::Zombie => "ZOMBIE",
            Event::Exited => "EXITED",
            Event::Signaled => "SIGNALED",
            Event::Orphan => "ORPHAN",
            Event::Waited => "WAITED",
        }
    }
}

/// The structured event log. Truncated at scheduler init; every state
/// transition appends one line:
///
/// ```text
/// [ tick] EVENT      pid   prio cmd
/// ```
///
/// `NICE` lines record the old and new priority instead of a single value.
/// Logging failures never fail the kernel.
pub struct EventLog {
    file: Option<File>,
}

impl EventLog {
    pub fn create(path: Option<&Path>) -> Self {
        let file = path.and_then(|path| match File::create(path) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot open event log");
                None
            }
        });
        Self { file }
    }

    pub fn event(&mut self, tick: u64, event: Event, pid: u16, prio: u8, cmd: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(
                file,
                "[{tick:>5}] {:<10} {pid:<5} {prio:<4} {cmd}",
                event.as_str()
            );
        }
    }

    pub fn nice(&mut self, tick: u64, pid: u16, old_prio: u8, new_prio: u8, cmd: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(
                file,
                "[{tick:>5}] {:<10} {pid:<3} {old_prio:<3} {new_prio:<2} {cmd}",
                "NICE"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lines_are_fixed_width() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = EventLog::create(Some(&path));
        log.event(3, Event::Schedule, 2, 0, "shell");
        log.nice(4, 2, 1, 0, "shell");
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[    3] SCHEDULE   2     0    shell\n[    4] NICE       2   1   0  shell\n"
        );
    }

    #[test]
    fn create_truncates_a_previous_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "stale\n").unwrap();
        let mut log = EventLog::create(Some(&path));
        log.event(0, Event::Create, 1, 0, "init");
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.starts_with("[    0] CREATE"));
    }
}

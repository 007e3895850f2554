use crate::pcb::Pid;

/// Job control bookkeeping consumed by the shell: a small table mapping
/// shell-visible job ids to processes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Background,
    Done,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
            JobState::Background => "Background",
            JobState::Done => "Done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pid: Pid,
    pub cmd: String,
    pub state: JobState,
}

/// Job ids are monotonic; "most recent" selection picks the highest id in the
/// requested state, which is what `fg`/`bg` with no argument use.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, pid: Pid, cmd: &str) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            pid,
            cmd: cmd.to_string(),
            state: JobState::Running,
        });
        id
    }

    pub fn find_by_pid(&mut self, pid: Pid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.pid == pid)
    }

    pub fn find_by_id(&mut self, id: u32) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.pid == pid)?;
        Some(self.jobs.remove(index))
    }

    pub fn most_recent_stopped(&mut self) -> Option<&mut Job> {
        self.jobs
            .iter_mut()
            .filter(|job| job.state == JobState::Stopped)
            .max_by_key(|job| job.id)
    }

    /// `fg`'s default target: the latest stopped job, else the latest
    /// background job.
    pub fn most_recent_stopped_or_background(&mut self) -> Option<&mut Job> {
        let has_stopped = self.jobs.iter().any(|job| job.state == JobState::Stopped);
        let target = if has_stopped {
            JobState::Stopped
        } else {
            JobState::Background
        };
        self.jobs
            .iter_mut()
            .filter(|job| job.state == target)
            .max_by_key(|job| job.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut table = JobTable::new();
        assert_eq!(table.add(10, "sleep 10"), 1);
        assert_eq!(table.add(11, "busy"), 2);
        table.remove(10);
        assert_eq!(table.add(12, "cat"), 3);
    }

    #[test]
    fn fg_prefers_stopped_over_background() {
        let mut table = JobTable::new();
        table.add(10, "a");
        table.add(11, "b");
        table.add(12, "c");
        table.find_by_pid(10).unwrap().state = JobState::Background;
        table.find_by_pid(11).unwrap().state = JobState::Stopped;
        table.find_by_pid(12).unwrap().state = JobState::Background;

        assert_eq!(table.most_recent_stopped_or_background().unwrap().pid, 11);
        table.find_by_pid(11).unwrap().state = JobState::Running;
        // No stopped job left: the latest background job wins.
        assert_eq!(table.most_recent_stopped_or_background().unwrap().pid, 12);
    }

    #[test]
    fn most_recent_stopped_picks_highest_id() {
        let mut table = JobTable::new();
        table.add(10, "a");
        table.add(11, "b");
        table.find_by_pid(10).unwrap().state = JobState::Stopped;
        table.find_by_pid(11).unwrap().state = JobState::Stopped;
        assert_eq!(table.most_recent_stopped().unwrap().pid, 11);
    }
}

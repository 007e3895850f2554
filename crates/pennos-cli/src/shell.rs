//! A minimal interactive shell: the external collaborator that exercises the
//! kernel's job-control and terminal-foreground contracts. Parsing is plain
//! whitespace tokens plus `<`, `>`, `>>`, and a trailing `&`.

use pennos_kernel::{JobState, JobTable, Process, Redirect, Signal, WaitStatus};

use crate::programs;

const PROMPT: &[u8] = b"$ ";

pub fn shell_main(proc: &Process) {
    let mut jobs = JobTable::new();
    let mut buf = [0u8; 4096];

    loop {
        // No foreground process while the shell reads input.
        proc.set_terminal_foreground(None);
        notify_finished_jobs(proc, &mut jobs);

        let _ = proc.write(1, PROMPT);
        let n = match proc.read(0, &mut buf) {
            Ok(0) => {
                // EOF (Ctrl-D): shut the OS down.
                proc.shutdown();
                proc.exit();
            }
            Ok(n) => n,
            Err(_) => {
                let _ = proc.write(1, b"\n");
                continue;
            }
        };

        let line = String::from_utf8_lossy(&buf[..n]).to_string();
        for command in line.lines() {
            if !command.trim().is_empty() {
                run_command_line(proc, &mut jobs, command.trim());
            }
        }
    }
}

/// Report background jobs that finished or stopped since the last prompt.
fn notify_finished_jobs(proc: &Process, jobs: &mut JobTable) {
    while let Ok(Some((pid, status))) = proc.waitpid(None, true) {
        let Some(job) = jobs.find_by_pid(pid) else {
            continue;
        };
        match status {
            WaitStatus::Exited | WaitStatus::Signaled => {
                let line = format!("[{}] Done {}\n", job.id, job.cmd);
                let _ = proc.write(1, line.as_bytes());
                jobs.remove(pid);
            }
            WaitStatus::Stopped => {
                job.state = JobState::Stopped;
                let line = format!("\n[{}] Stopped {}\n", job.id, job.cmd);
                let _ = proc.write(1, line.as_bytes());
            }
        }
    }
}

struct ParsedCommand {
    argv: Vec<String>,
    redirect: Redirect,
    background: bool,
}

fn parse(line: &str) -> Option<ParsedCommand> {
    let mut tokens = line.split_whitespace().peekable();
    let mut argv = Vec::new();
    let mut redirect = Redirect::none();
    let mut background = false;

    while let Some(token) = tokens.next() {
        match token {
            "<" => redirect.stdin = Some(tokens.next()?.to_string()),
            ">" => {
                redirect.stdout = Some(tokens.next()?.to_string());
                redirect.append = false;
            }
            ">>" => {
                redirect.stdout = Some(tokens.next()?.to_string());
                redirect.append = true;
            }
            "&" if tokens.peek().is_none() => background = true,
            _ => argv.push(token.to_string()),
        }
    }
    if argv.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        argv,
        redirect,
        background,
    })
}

fn run_command_line(proc: &Process, jobs: &mut JobTable, line: &str) {
    let Some(mut cmd) = parse(line) else {
        let _ = proc.write(2, b"shell: parse error\n");
        return;
    };

    // `nice P CMD ...` wraps another command.
    let mut priority = None;
    if cmd.argv[0] == "nice" {
        if cmd.argv.len() < 3 {
            let _ = proc.write(2, b"nice: usage: nice <priority> <command> [args...]\n");
            return;
        }
        match cmd.argv[1].parse::<u8>() {
            Ok(prio) if prio <= 2 => priority = Some(prio),
            _ => {
                let _ = proc.write(2, b"nice: invalid priority\n");
                return;
            }
        }
        cmd.argv.drain(..2);
    }

    match cmd.argv[0].as_str() {
        "man" => return programs::man(proc),
        "nice_pid" => return nice_pid(proc, &cmd.argv),
        "jobs" => return list_jobs(proc, jobs),
        "bg" => return bg(proc, jobs, &cmd.argv),
        "fg" => return fg(proc, jobs, &cmd.argv),
        "logout" => {
            let _ = proc.write(1, b"Logging out...\n");
            proc.shutdown();
            proc.exit();
        }
        _ => {}
    }

    let Some(entry) = programs::lookup(&cmd.argv[0]) else {
        let line = format!("shell: command not found: {}\n", cmd.argv[0]);
        let _ = proc.write(2, line.as_bytes());
        return;
    };

    let cmd_line = cmd.argv.join(" ");
    let child = match proc.spawn(entry, cmd.argv, cmd.redirect) {
        Ok(pid) => pid,
        Err(_) => {
            proc.perror("shell: spawn failed");
            return;
        }
    };
    if let Some(prio) = priority {
        let _ = proc.nice(child, prio);
    }

    if cmd.background {
        let id = jobs.add(child, &cmd_line);
        if let Some(job) = jobs.find_by_pid(child) {
            job.state = JobState::Background;
        }
        let line = format!("[{id}] {child}\n");
        let _ = proc.write(1, line.as_bytes());
        return;
    }

    wait_foreground(proc, jobs, child, &cmd_line);
}

/// Hand the terminal to a child and wait for it to exit or stop.
fn wait_foreground(proc: &Process, jobs: &mut JobTable, child: u16, cmd_line: &str) {
    proc.set_terminal_foreground(Some(child));
    match proc.waitpid(Some(child), false) {
        Ok(Some((_, WaitStatus::Stopped))) => {
            let id = jobs.add(child, cmd_line);
            if let Some(job) = jobs.find_by_pid(child) {
                job.state = JobState::Stopped;
            }
            let line = format!("\n[{id}] Stopped {cmd_line}\n");
            let _ = proc.write(1, line.as_bytes());
        }
        Ok(Some((_, WaitStatus::Signaled))) => {
            let _ = proc.write(1, b"\n");
        }
        _ => {}
    }
    proc.set_terminal_foreground(None);
}

fn nice_pid(proc: &Process, argv: &[String]) {
    let (Some(prio), Some(pid)) = (
        argv.get(1).and_then(|arg| arg.parse::<u8>().ok()),
        argv.get(2).and_then(|arg| arg.parse::<u16>().ok()),
    ) else {
        let _ = proc.write(2, b"nice_pid: usage: nice_pid <priority> <pid>\n");
        return;
    };
    if proc.nice(pid, prio).is_err() {
        proc.perror("nice_pid");
    }
}

fn list_jobs(proc: &Process, jobs: &mut JobTable) {
    let lines: Vec<String> = jobs
        .iter()
        .map(|job| {
            format!(
                "[{}] {} {:<10} {}\n",
                job.id,
                job.pid,
                job.state.as_str(),
                job.cmd
            )
        })
        .collect();
    for line in lines {
        let _ = proc.write(1, line.as_bytes());
    }
}

fn bg(proc: &Process, jobs: &mut JobTable, argv: &[String]) {
    let job = match select_job(jobs, argv, false) {
        Ok(job) => job,
        Err(msg) => {
            let _ = proc.write(2, msg.as_bytes());
            return;
        }
    };
    let (pid, id, cmd) = (job.pid, job.id, job.cmd.clone());
    job.state = JobState::Background;
    if proc.kill(pid, Signal::Cont).is_err() {
        proc.perror("bg");
        return;
    }
    let line = format!("[{id}] {cmd} &\n");
    let _ = proc.write(1, line.as_bytes());
}

fn fg(proc: &Process, jobs: &mut JobTable, argv: &[String]) {
    let job = match select_job(jobs, argv, true) {
        Ok(job) => job,
        Err(msg) => {
            let _ = proc.write(2, msg.as_bytes());
            return;
        }
    };
    let (pid, cmd) = (job.pid, job.cmd.clone());
    job.state = JobState::Running;
    let line = format!("{cmd}\n");
    let _ = proc.write(1, line.as_bytes());
    if proc.kill(pid, Signal::Cont).is_err() {
        proc.perror("fg");
        return;
    }
    jobs.remove(pid);
    wait_foreground(proc, jobs, pid, &cmd);
}

fn select_job<'a>(
    jobs: &'a mut JobTable,
    argv: &[String],
    include_background: bool,
) -> Result<&'a mut pennos_kernel::Job, String> {
    match argv.get(1) {
        Some(arg) => {
            let id: u32 = arg
                .parse()
                .map_err(|_| format!("{}: argument must be a job ID\n", argv[0]))?;
            jobs.find_by_id(id)
                .ok_or_else(|| format!("{}: no such job\n", argv[0]))
        }
        None => {
            let job = if include_background {
                jobs.most_recent_stopped_or_background()
            } else {
                jobs.most_recent_stopped()
            };
            job.ok_or_else(|| format!("{}: no current job\n", argv[0]))
        }
    }
}

//! Demo user programs the shell can spawn. Each runs as a guest process and
//! talks to the OS through its `Process` handle only.

use std::path::Path;

use pennfat::{CHMOD_ADD, CHMOD_ASSIGN, CHMOD_MASK, CHMOD_REMOVE, OpenMode};
use pennos_kernel::{Entry, Process, Signal};

pub fn lookup(name: &str) -> Option<Entry> {
    Some(match name {
        "cat" => cat_main,
        "sleep" => sleep_main,
        "busy" => busy_main,
        "echo" => echo_main,
        "ls" => ls_main,
        "touch" => touch_main,
        "mv" => mv_main,
        "cp" => cp_main,
        "rm" => rm_main,
        "chmod" => chmod_main,
        "ps" => ps_main,
        "kill" => kill_main,
        "zombify" => zombify_main,
        "orphanify" => orphanify_main,
        _ => return None,
    })
}

pub fn man(proc: &Process) {
    let _ = proc.write(
        1,
        b"commands: cat sleep busy echo ls touch mv cp rm chmod ps kill \
zombify orphanify nice nice_pid jobs bg fg man logout\n",
    );
}

fn cat_main(proc: &Process) {
    let args = proc.args();
    if proc.cat(&args[1..]).is_err() {
        proc.perror("cat");
    }
    proc.exit();
}

fn sleep_main(proc: &Process) {
    let args = proc.args();
    let Some(seconds) = args.get(1).and_then(|arg| arg.parse::<u64>().ok()) else {
        let _ = proc.write(2, b"sleep: missing or invalid time interval\n");
        proc.exit();
    };
    // One second is ten ticks.
    proc.sleep(seconds * 10);
    proc.exit();
}

fn busy_main(proc: &Process) {
    loop {
        proc.yield_now();
    }
}

fn echo_main(proc: &Process) {
    let args = proc.args();
    let line = format!("{}\n", args[1..].join(" "));
    let _ = proc.write(1, line.as_bytes());
    proc.exit();
}

fn ls_main(proc: &Process) {
    let args = proc.args();
    if proc.ls(args.get(1).map(String::as_str)).is_err() {
        proc.perror("ls");
    }
    proc.exit();
}

fn touch_main(proc: &Process) {
    let args = proc.args();
    if args.len() < 2 {
        let _ = proc.write(2, b"touch: missing operand\n");
        proc.exit();
    }
    for name in &args[1..] {
        match proc.open(name, OpenMode::APPEND) {
            Ok(fd) => {
                let _ = proc.close(fd);
            }
            Err(_) => proc.perror(name),
        }
    }
    proc.exit();
}

fn mv_main(proc: &Process) {
    let args = proc.args();
    if args.len() != 3 {
        let _ = proc.write(2, b"mv: usage: mv SOURCE DEST\n");
    } else if proc.rename(&args[1], &args[2]).is_err() {
        proc.perror("mv");
    }
    proc.exit();
}

fn cp_main(proc: &Process) {
    let args = proc.args();
    // cp -h SRC DST (host to volume), cp SRC -h DST (volume to host),
    // cp SRC DST (within the volume).
    let result = match (args.get(1).map(String::as_str), args.get(2).map(String::as_str)) {
        (Some("-h"), Some(src)) => match args.get(3) {
            Some(dest) => proc.copy_from_host(Path::new(src), dest),
            None => Err(pennos_kernel::Errno::InvalidArgument),
        },
        (Some(src), Some("-h")) => match args.get(3) {
            Some(dest) => proc.copy_to_host(src, Path::new(dest)),
            None => Err(pennos_kernel::Errno::InvalidArgument),
        },
        (Some(src), Some(dest)) => proc.copy_within(src, dest),
        _ => Err(pennos_kernel::Errno::InvalidArgument),
    };
    if result.is_err() {
        proc.perror("cp");
    }
    proc.exit();
}

fn rm_main(proc: &Process) {
    let args = proc.args();
    if args.len() < 2 {
        let _ = proc.write(2, b"rm: missing operand\n");
    }
    for name in &args[1..] {
        if proc.unlink(name).is_err() {
            proc.perror(name);
        }
    }
    proc.exit();
}

/// Accepts `+rwx`, `-rwx`, `=rwx`, or a bare octal digit.
fn parse_chmod(spec: &str) -> Option<u8> {
    let (op, rest) = match spec.as_bytes().first()? {
        b'+' => (CHMOD_ADD, &spec[1..]),
        b'-' => (CHMOD_REMOVE, &spec[1..]),
        b'=' => (CHMOD_ASSIGN, &spec[1..]),
        _ => return spec.parse::<u8>().ok().map(|mode| mode & CHMOD_MASK),
    };
    let mut mask = 0u8;
    for ch in rest.chars() {
        mask |= match ch {
            'r' => 0x04,
            'w' => 0x02,
            'x' => 0x01,
            _ => return None,
        };
    }
    Some(op | mask)
}

fn chmod_main(proc: &Process) {
    let args = proc.args();
    let op = args.get(1).and_then(|spec| parse_chmod(spec));
    match (op, args.get(2)) {
        (Some(op), Some(name)) => {
            if proc.chmod(name, op).is_err() {
                proc.perror("chmod");
            }
        }
        _ => {
            let _ = proc.write(2, b"chmod: usage: chmod PERM FILE\n");
        }
    }
    proc.exit();
}

fn ps_main(proc: &Process) {
    let header = format!("{:<6} {:<6} {:<4} {:<5} {}\n", "PID", "PPID", "PRI", "STAT", "CMD");
    let _ = proc.write(1, header.as_bytes());
    for info in proc.processes() {
        let line = format!(
            "{:<6} {:<6} {:<4} {:<5} {}\n",
            info.pid,
            info.ppid,
            info.prio,
            info.state.code(),
            info.cmd_name
        );
        let _ = proc.write(1, line.as_bytes());
    }
    proc.exit();
}

fn kill_main(proc: &Process) {
    let args = proc.args();
    let (signal, pids) = match args.get(1).map(String::as_str) {
        Some("-term") => (Signal::Term, &args[2..]),
        Some("-stop") => (Signal::Stop, &args[2..]),
        Some("-cont") => (Signal::Cont, &args[2..]),
        Some(_) => (Signal::Term, &args[1..]),
        None => {
            let _ = proc.write(2, b"kill: usage: kill [-term|-stop|-cont] PID...\n");
            proc.exit();
        }
    };
    for arg in pids {
        match arg.parse::<u16>() {
            Ok(pid) => {
                if proc.kill(pid, signal).is_err() {
                    proc.perror("kill");
                }
            }
            Err(_) => {
                let _ = proc.write(2, b"kill: invalid pid\n");
            }
        }
    }
    proc.exit();
}

fn spin_child(proc: &Process) {
    loop {
        proc.yield_now();
    }
}

/// Leaves a zombie around: the child exits immediately and is never reaped.
fn zombify_main(proc: &Process) {
    let _ = proc.spawn(
        zombie_child,
        vec!["zombie_child".to_string()],
        pennos_kernel::Redirect::none(),
    );
    loop {
        proc.yield_now();
    }
}

fn zombie_child(proc: &Process) {
    proc.exit();
}

/// Dies before its child: the spinner is re-parented to init.
fn orphanify_main(proc: &Process) {
    let _ = proc.spawn(
        spin_child,
        vec!["orphan_child".to_string()],
        pennos_kernel::Redirect::none(),
    );
    proc.exit();
}

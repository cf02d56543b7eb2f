//! Thin wrappers over `kill(2)` for group termination, force kill and the
//! zero-signal existence probe.
//!
//! Workers lead their own process group (pgid == pid), so the `*_group`
//! variants reach wrapper scripts and everything they spawned.

use std::io;

#[cfg(unix)]
fn checked_pid(pid: u32) -> io::Result<libc::pid_t> {
    // pid 0 and negative pids address process groups
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {}", pid)))
}

#[cfg(unix)]
fn send_signal(target: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Kill a process unconditionally (SIGKILL)
#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    send_signal(checked_pid(pid)?, libc::SIGKILL)
}

/// SIGTERM to every member of the group led by `pgid`
#[cfg(unix)]
pub fn terminate_group(pgid: u32) -> io::Result<()> {
    send_signal(-checked_pid(pgid)?, libc::SIGTERM)
}

/// SIGKILL to every member of the group led by `pgid`
#[cfg(unix)]
pub fn force_kill_group(pgid: u32) -> io::Result<()> {
    send_signal(-checked_pid(pgid)?, libc::SIGKILL)
}

/// Existence probe. EPERM means the pid exists but belongs to someone else;
/// a zombie waiting to be reaped counts as gone.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(target) = checked_pid(pid) else {
        return false;
    };
    let exists = match send_signal(target, 0) {
        Ok(()) => true,
        Err(e) => e.raw_os_error() == Some(libc::EPERM),
    };
    exists && !is_zombie(pid)
}

/// Whether any process is left in the group led by `pgid`
#[cfg(unix)]
pub fn is_group_running(pgid: u32) -> bool {
    match checked_pid(pgid) {
        Ok(target) => match send_signal(-target, 0) {
            Ok(()) => true,
            Err(e) => e.raw_os_error() == Some(libc::EPERM),
        },
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rfind(')')
                .and_then(|end| stat[end + 1..].split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(not(unix))]
pub fn terminate_group(_pgid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(not(unix))]
pub fn force_kill_group(_pgid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn is_group_running(_pgid: u32) -> bool {
    false
}

/// True when the error means the process is already gone
pub fn is_no_such_process(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

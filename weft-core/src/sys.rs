//! A small pocket of raw `libc` calls for the handful of operations rustix
//! does not expose a safe wrapper for: signal disposition toggling
//! (`SIG_DFL`/`SIG_IGN` for `SIGTSTP`, which needs to bypass any handler a
//! library installed) and non-blocking zombie reaping. Everything else
//! (sockets, locks, termios, pids) goes through `rustix` instead, matching
//! the rest of this crate.

use std::io;

/// Reaps any already-exited children without blocking. Called on every
/// `SIGCHLD`, in both the WAIT and ATTACHED phases.
pub fn reap_children() {
    loop {
        // SAFETY: pid/status/options are all valid for waitpid; -1 means
        // "any child", WNOHANG means never block.
        let pid = unsafe { libc::waitpid(-1, core::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
    }
}

/// Installs the process default disposition for `SIGTSTP`, the way a
/// shell does before letting a job voluntarily stop itself — a job-control
/// stop only suspends the process if its `SIGTSTP` disposition is the
/// kernel default, not a caught/ignored one.
pub fn set_tstp_default() {
    // SAFETY: SIGTSTP and SIG_DFL are both valid libc constants; signal()
    // has no preconditions beyond that.
    unsafe { libc::signal(libc::SIGTSTP, libc::SIG_DFL) };
}

/// Sets `SIGTSTP` to be ignored, with restart semantics for any syscall
/// that was interrupted by it. Used on `SIGCONT` to close the race where
/// the server might resume output before the client reinstates its signal
/// posture.
pub fn set_tstp_ignore_restart() {
    let action = libc::sigaction {
        sa_sigaction: libc::SIG_IGN,
        sa_mask: unsafe { std::mem::zeroed() },
        sa_flags: libc::SA_RESTART,
        #[cfg(target_os = "linux")]
        sa_restorer: None,
    };
    // SAFETY: `action` is a fully initialized sigaction with a valid
    // handler constant (SIG_IGN) and no restorer on the platforms that
    // don't need one.
    unsafe { libc::sigaction(libc::SIGTSTP, &action, core::ptr::null_mut()) };
}

/// Raises `SIGTSTP` against this process, used to implement `SUSPEND`
/// after restoring the default disposition.
pub fn raise_tstp() -> io::Result<()> {
    // SAFETY: SIGTSTP is a valid signal number; raise() has no other
    // preconditions.
    match unsafe { libc::raise(libc::SIGTSTP) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

/// `closefrom(STDERR_FILENO + 1)`: closes every open descriptor above
/// stderr. Called before both exec paths so the duplicated stdin fd, the
/// socket fd, and any inherited lock fd don't leak into the exec'd shell.
/// Best-effort: `/proc/self/fd` not being readable just means nothing gets
/// closed, which is no worse than the status quo before this was added.
pub fn closefrom_stderr() {
    let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
        return;
    };
    for entry in entries.flatten() {
        let Some(fd) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if fd > libc::STDERR_FILENO {
            // SAFETY: fd came from /proc/self/fd, so it is either already
            // closed (a race with the directory read, in which case close()
            // just returns EBADF and is a no-op) or a descriptor this
            // process actually owns.
            unsafe { libc::close(fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_children_does_not_block_with_no_children() {
        reap_children();
    }
}

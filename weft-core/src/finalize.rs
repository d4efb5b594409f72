//! Last step after the event loop returns: print the exit message, run the
//! two `__dead` exec paths, and restore stdio to blocking mode. See spec
//! §4.7 and the "`__dead` exec paths" design note.

use std::{
    io::{self, Write},
    os::unix::process::CommandExt,
    path::Path,
    process::Command,
};

use rustix::fd::AsFd;

use crate::{
    config::ClientFlags,
    state::ClientState,
    sys, termios,
};

/// `-basename` if `LOGIN` is set, else plain `basename` — the `argv0` both
/// exec paths pass the shell, derived from its path the same way.
fn login_argv0(shell: &str, flags: ClientFlags) -> String {
    let basename = Path::new(shell)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shell.to_string());
    if flags.contains(ClientFlags::LOGIN) {
        format!("-{basename}")
    } else {
        basename
    }
}

/// Puts stdin, stdout, and stderr back into blocking mode. Must run before
/// any exec, or the child inherits non-blocking stdio and misbehaves.
pub fn restore_blocking_stdio() {
    for fd in [io::stdin().as_fd(), io::stdout().as_fd(), io::stderr().as_fd()] {
        // best-effort: a failure here shouldn't stop the rest of exit
        // finalization, since the server already has the authoritative copy
        // of anything that would otherwise be lost.
        let _ = clear_nonblocking(fd);
    }
}

fn clear_nonblocking(fd: rustix::fd::BorrowedFd<'_>) -> io::Result<()> {
    use rustix::fs::{fcntl_getfl, fcntl_setfl, OFlags};
    let flags = fcntl_getfl(fd)?;
    fcntl_setfl(fd, flags & !OFlags::NONBLOCK)?;
    Ok(())
}

/// Replaces the process image with `shell argv0 -c shellcmd`, clearing the
/// process's signal dispositions first (the server now owns the
/// terminal). Only reachable from the WAIT phase's `SHELL` frame. Returns
/// only on failure, by Rust convention — `exec` never returns on success.
pub fn exec_shell_now(shell: &str, shellcmd: &str, flags: ClientFlags) -> io::Error {
    restore_blocking_stdio();
    reset_signal_dispositions();
    sys::closefrom_stderr();

    let argv0 = login_argv0(shell, flags);
    std::env::set_var("SHELL", shell);
    Command::new(shell).arg0(argv0).arg("-c").arg(shellcmd).exec()
}

fn reset_signal_dispositions() {
    for sig in [
        libc::SIGCHLD,
        libc::SIGTERM,
        libc::SIGHUP,
        libc::SIGWINCH,
        libc::SIGCONT,
        libc::SIGTSTP,
    ] {
        // SAFETY: each signal number is a valid libc constant and SIG_DFL
        // needs no further preconditions.
        unsafe { libc::signal(sig, libc::SIG_DFL) };
    }
}

/// Replaces the process image with `shell argv0 -c execstr`, where `argv0`
/// is `-basename` if `LOGIN` is set, else plain `basename`. Returns only on
/// failure. `parent_pid > 1` sends it `HUP` first iff `exit_type ==
/// DETACHKILL`, handled by [`finalize`] before this is called.
pub fn exec_shell_for_detach(shell: &str, execstr: &str, flags: ClientFlags) -> io::Error {
    restore_blocking_stdio();
    sys::closefrom_stderr();

    let argv0 = login_argv0(shell, flags);
    std::env::set_var("SHELL", shell);
    Command::new(shell)
        .arg0(argv0)
        .arg("-c")
        .arg(execstr)
        .exec()
}

/// The non-exec exit path: prints the reason, optionally signals the
/// parent, handles `CONTROLCONTROL` framing, restores termios and blocking
/// stdio, and returns the process exit status.
///
/// Exec paths (`exit_type == Exec`, or the WAIT-phase `SHELL` frame) are
/// handled by the dispatcher/event loop calling [`exec_shell_now`] /
/// [`exec_shell_for_detach`] directly instead of this function, since a
/// successful exec never returns to call it.
pub fn finalize(state: &ClientState, flags: ClientFlags, parent_pid: i32) -> i32 {
    use weft_protocol::FrameKind;

    let message = state.exit_reason().message(state.exit_session.as_deref());
    let attached = state.phase() == crate::state::Phase::Attached;

    if attached {
        if let Some(msg) = &message {
            println!("[{msg}]");
        }
        if state.exit_type == Some(FrameKind::DetachKill) && parent_pid > 1 {
            // SAFETY: parent_pid is a valid pid and SIGHUP a valid signal;
            // kill() has no further preconditions.
            unsafe { libc::kill(parent_pid, libc::SIGHUP) };
        }
    } else if flags.contains(ClientFlags::CONTROL_CONTROL) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        match &message {
            Some(msg) => { let _ = writeln!(out, "%exit {msg}"); }
            None => { let _ = writeln!(out, "%exit"); }
        }
        let _ = write!(out, "\x1b\\");
        let _ = out.flush();
        if let Some(saved) = &state.saved_termios {
            let _ = termios::restore(io::stdin(), saved);
        }
    } else if let Some(msg) = &message {
        eprintln!("{msg}");
    }

    restore_blocking_stdio();
    state.exit_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExitReason;

    #[test]
    fn exit_value_is_returned_unchanged() {
        let mut state = ClientState::new();
        state.set_exit_reason(ExitReason::Exited, 7);
        let code = finalize(&state, ClientFlags::empty(), 0);
        assert_eq!(code, 7);
    }

    #[test]
    fn login_argv0_is_prefixed_only_with_login_flag() {
        assert_eq!(login_argv0("/bin/sh", ClientFlags::empty()), "sh");
        assert_eq!(login_argv0("/bin/sh", ClientFlags::LOGIN), "-sh");
    }
}

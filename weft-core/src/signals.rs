//! Translates asynchronous OS signal delivery into synchronous events the
//! event loop harness can multiplex alongside socket and stdin readiness.
//! See spec §4.5 and the "signal-to-event bridging" design note.

use std::os::fd::{AsRawFd, RawFd};

use signal_hook::consts::{SIGCHLD, SIGCONT, SIGHUP, SIGTERM, SIGTSTP, SIGWINCH};
use signal_hook::iterator::Signals;

use crate::{state::Phase, sys};

/// A single local action the signal router decided on, for the event loop
/// harness to carry out (it owns the socket and process-exit calls that
/// `signals.rs` shouldn't reach around it to perform).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Reap already-exited children. Always emitted on `SIGCHLD`,
    /// regardless of phase; carries no other effect.
    Reaped,
    /// `SIGTERM` before attach: exit cleanly right away.
    CleanExit,
    /// `SIGTERM` after attach: set `TERMINATED`, value 1, send `EXITING`.
    Terminated,
    /// `SIGHUP` after attach: set `LOST_TTY`, value 1, send `EXITING`.
    LostTty,
    /// `SIGWINCH` after attach: send a bare `RESIZE`.
    Resize,
    /// `SIGCONT` after attach: TSTP disposition already reset by the
    /// router; send `WAKEUP`.
    Wakeup,
    /// `SIGTSTP` before attach: the router already restored the default
    /// disposition; the caller should have already re-raised if needed.
    NoOp,
}

/// Owns the self-pipe/queue registration for the signals this client
/// cares about: `SIGCHLD`, `SIGTERM`, `SIGHUP`, `SIGWINCH`, `SIGCONT`,
/// `SIGTSTP`.
pub struct SignalRouter {
    signals: Signals,
}

impl SignalRouter {
    pub fn install() -> std::io::Result<Self> {
        let signals = Signals::new([SIGCHLD, SIGTERM, SIGHUP, SIGWINCH, SIGCONT, SIGTSTP])?;
        Ok(Self { signals })
    }

    /// The file descriptor the event loop harness should add to its poll
    /// set; readable means at least one queued signal is ready to drain.
    pub fn as_raw_fd(&self) -> RawFd {
        self.signals.as_raw_fd()
    }

    /// Drains every signal queued since the last call and maps each to the
    /// action the spec's phase-dependent table assigns it. `CHLD` is
    /// reaped eagerly here (not deferred to the caller) since it has no
    /// phase dependence and no frame to send.
    pub fn drain(&mut self, phase: Phase) -> Vec<SignalAction> {
        let mut actions = Vec::new();
        for signal in self.signals.pending() {
            match signal {
                SIGCHLD => {
                    sys::reap_children();
                    actions.push(SignalAction::Reaped);
                }
                SIGTERM => match phase {
                    Phase::Wait => actions.push(SignalAction::CleanExit),
                    Phase::Attached => actions.push(SignalAction::Terminated),
                },
                SIGHUP => {
                    if phase == Phase::Attached {
                        actions.push(SignalAction::LostTty);
                    }
                    // pre-attach HUP has no special action, per spec §4.5.
                }
                SIGWINCH => {
                    if phase == Phase::Attached {
                        actions.push(SignalAction::Resize);
                    }
                    // pre-attach WINCH is ignored.
                }
                SIGCONT => {
                    if phase == Phase::Attached {
                        // restore TSTP to ignored-with-restart *before*
                        // announcing wakeup, closing the race where the
                        // server resumes output before our signal posture
                        // is reinstated.
                        sys::set_tstp_ignore_restart();
                        actions.push(SignalAction::Wakeup);
                    }
                    // pre-attach CONT is ignored.
                }
                SIGTSTP => {
                    // TSTP is only ever raised by us (see `finalize`'s
                    // SUSPEND handling / `suspend_self`); nothing to do
                    // here besides letting it fall through to the default
                    // disposition we install around the self-raise.
                    actions.push(SignalAction::NoOp);
                }
                other => log::debug!("ignoring unexpected queued signal {other}"),
            }
        }
        actions
    }
}

/// Implements the `SUSPEND` (attached) and voluntary-stop-on-`TSTP`
/// sequence: install the default disposition, raise `TSTP` on ourselves,
/// and return once we've been resumed. The caller is expected to follow up
/// by restoring the ignored-with-restart disposition on the next `SIGCONT`.
pub fn suspend_self() -> std::io::Result<()> {
    sys::set_tstp_default();
    sys::raise_tstp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigwinch_is_ignored_before_attach() {
        let mut router = SignalRouter::install().unwrap();
        signal_hook::low_level::raise(SIGWINCH).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let actions = router.drain(Phase::Wait);
        assert!(actions.is_empty());
    }

    #[test]
    fn sigwinch_sends_resize_after_attach() {
        let mut router = SignalRouter::install().unwrap();
        signal_hook::low_level::raise(SIGWINCH).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let actions = router.drain(Phase::Attached);
        assert_eq!(actions, vec![SignalAction::Resize]);
    }

    #[test]
    fn sigterm_before_attach_is_clean_exit() {
        let mut router = SignalRouter::install().unwrap();
        signal_hook::low_level::raise(SIGTERM).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let actions = router.drain(Phase::Wait);
        assert_eq!(actions, vec![SignalAction::CleanExit]);
    }

    #[test]
    fn sigterm_after_attach_is_terminated() {
        let mut router = SignalRouter::install().unwrap();
        signal_hook::low_level::raise(SIGTERM).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let actions = router.drain(Phase::Attached);
        assert_eq!(actions, vec![SignalAction::Terminated]);
    }
}

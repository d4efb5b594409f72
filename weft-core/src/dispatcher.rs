//! Phase-aware decoder of inbound frames. Pure decision logic: every branch
//! returns the side effects the event loop harness must carry out, rather
//! than performing I/O itself, so the tables in spec §4.6 can be tested
//! without a real socket.

use weft_protocol::{Frame, FrameKind};

use crate::{
    config::ClientConfig,
    state::{ClientState, ExitReason, Phase},
};

/// A single side effect the harness must perform in response to a
/// dispatch. A dispatch of one frame can (and often does) produce several,
/// in order.
#[derive(Debug)]
pub enum Effect {
    /// Send a frame to the server.
    Send(Frame),
    /// Write bytes to local stdout, with the harness's own retry-on-EINTR
    /// write loop.
    WriteStdout(Box<[u8]>),
    /// Write bytes to local stderr, with the same retry loop.
    WriteStderr(Box<[u8]>),
    /// Re-arm the stdin pump (server asked for more input).
    RearmStdin,
    /// De-register the stdin pump (server has taken over the tty).
    DisarmStdin,
    /// One-time privilege narrowing: all identity fds have already been
    /// sent, so the "send file descriptors" capability can be dropped.
    NarrowPrivilege,
    /// Clear installed signal handlers and replace the process image with
    /// `shell -c shellcmd`. Only reachable from the WAIT phase's `SHELL`
    /// frame; never returns on success.
    ExecShellNow { shell: String },
    /// Restore `TSTP` to default and raise it on ourselves.
    SuspendSelf,
    /// Run `cmd` synchronously via the shell, then send `UNLOCK`.
    RunLockCommand { cmd: String },
    /// Terminate the event loop; `ClientState` already reflects why.
    TerminateLoop,
    /// The wire contract was violated by the peer. Fatal: log and abort,
    /// per spec §7 ("these indicate a programming error in peer or
    /// client").
    ProtocolViolation(String),
}

#[derive(Default)]
pub struct Dispatcher {
    privilege_narrowed: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `frame == None` means the peer connection was lost.
    pub fn dispatch(
        &mut self,
        state: &mut ClientState,
        cfg: &ClientConfig,
        frame: Option<Frame>,
    ) -> Vec<Effect> {
        let Some(frame) = frame else {
            state.set_exit_reason(ExitReason::LostServer, 1);
            return vec![Effect::TerminateLoop];
        };

        let mut effects = Vec::new();
        if !self.privilege_narrowed {
            self.privilege_narrowed = true;
            effects.push(Effect::NarrowPrivilege);
        }

        match state.phase() {
            Phase::Wait => self.dispatch_wait(state, cfg, frame, &mut effects),
            Phase::Attached => self.dispatch_attached(state, frame, &mut effects),
        }
        effects
    }

    fn dispatch_wait(
        &mut self,
        state: &mut ClientState,
        cfg: &ClientConfig,
        frame: Frame,
        effects: &mut Vec<Effect>,
    ) {
        match frame.kind {
            FrameKind::Exit | FrameKind::Shutdown => match frame.parse_optional_int() {
                Some(Some(value)) => {
                    state.exit_value = value;
                    effects.push(Effect::TerminateLoop);
                }
                Some(None) => effects.push(Effect::TerminateLoop),
                None => effects.push(Effect::ProtocolViolation(format!(
                    "{:?}: expected 0 or int payload",
                    frame.kind
                ))),
            },
            FrameKind::Ready if frame.payload.is_empty() => {
                state.attach();
                effects.push(Effect::DisarmStdin);
                effects.push(Effect::Send(Frame::empty(FrameKind::Resize)));
            }
            FrameKind::Stdin if frame.payload.is_empty() => effects.push(Effect::RearmStdin),
            FrameKind::Ready | FrameKind::Stdin => effects.push(Effect::ProtocolViolation(format!(
                "{:?}: expected an empty payload",
                frame.kind
            ))),
            FrameKind::Stdout => effects.push(Effect::WriteStdout(frame.payload)),
            FrameKind::Stderr => effects.push(Effect::WriteStderr(frame.payload)),
            FrameKind::Version => {
                let msg = format!(
                    "protocol version mismatch (client {}, server {})",
                    crate::PROTOCOL_VERSION, frame.peer_protocol_version
                );
                effects.push(Effect::WriteStderr(format!("{msg}\n").into_bytes().into()));
                state.exit_value = 1;
                effects.push(Effect::TerminateLoop);
            }
            FrameKind::Shell => match frame.parse_nul_terminated() {
                Some(shell) => effects.push(Effect::ExecShellNow {
                    shell: shell.to_string(),
                }),
                None => effects.push(Effect::ProtocolViolation(
                    "SHELL: expected a NUL-terminated string".to_string(),
                )),
            },
            FrameKind::Detach | FrameKind::DetachKill => {
                effects.push(Effect::Send(Frame::empty(FrameKind::Exiting)));
            }
            FrameKind::Exited => effects.push(Effect::TerminateLoop),
            other => effects.push(Effect::ProtocolViolation(format!(
                "unexpected frame {other:?} in WAIT phase"
            ))),
        }
        let _ = cfg;
    }

    fn dispatch_attached(&mut self, state: &mut ClientState, frame: Frame, effects: &mut Vec<Effect>) {
        match frame.kind {
            FrameKind::Detach | FrameKind::DetachKill => match frame.parse_nul_terminated() {
                Some(session) if !session.is_empty() => {
                    state.exit_session = Some(session.to_string());
                    state.exit_type = Some(frame.kind);
                    let reason = if frame.kind == FrameKind::DetachKill {
                        ExitReason::DetachedHup
                    } else {
                        ExitReason::Detached
                    };
                    state.set_exit_reason(reason, 0);
                    effects.push(Effect::Send(Frame::empty(FrameKind::Exiting)));
                }
                _ => effects.push(Effect::ProtocolViolation(
                    "DETACH: expected a non-empty session name".to_string(),
                )),
            },
            FrameKind::Exec => match frame.parse_exec() {
                Some((shellcmd, shell)) => {
                    state.exec_str = Some(shellcmd.to_string());
                    state.exec_shell = Some(shell.to_string());
                    state.exit_type = Some(FrameKind::Exec);
                    effects.push(Effect::Send(Frame::empty(FrameKind::Exiting)));
                }
                None => effects.push(Effect::ProtocolViolation(
                    "EXEC: expected two NUL-terminated strings".to_string(),
                )),
            },
            FrameKind::Exit => {
                effects.push(Effect::Send(Frame::empty(FrameKind::Exiting)));
                match frame.parse_optional_int() {
                    Some(Some(value)) => state.set_exit_reason(ExitReason::Exited, value),
                    Some(None) => state.set_exit_reason(ExitReason::Exited, 0),
                    None => {
                        effects.push(Effect::ProtocolViolation(
                            "EXIT: expected 0 or int payload".to_string(),
                        ));
                    }
                }
            }
            FrameKind::Exited if frame.payload.is_empty() => effects.push(Effect::TerminateLoop),
            FrameKind::Shutdown if frame.payload.is_empty() => {
                effects.push(Effect::Send(Frame::empty(FrameKind::Exiting)));
                state.set_exit_reason(ExitReason::ServerExited, 1);
            }
            FrameKind::Suspend if frame.payload.is_empty() => effects.push(Effect::SuspendSelf),
            FrameKind::Exited | FrameKind::Shutdown | FrameKind::Suspend => {
                effects.push(Effect::ProtocolViolation(format!(
                    "{:?}: expected an empty payload",
                    frame.kind
                )))
            }
            FrameKind::Lock => match frame.parse_nul_terminated() {
                Some(cmd) => effects.push(Effect::RunLockCommand {
                    cmd: cmd.to_string(),
                }),
                None => effects.push(Effect::ProtocolViolation(
                    "LOCK: expected a NUL-terminated string".to_string(),
                )),
            },
            FrameKind::Stdout => effects.push(Effect::WriteStdout(frame.payload)),
            FrameKind::Stderr => effects.push(Effect::WriteStderr(frame.payload)),
            FrameKind::Resize | FrameKind::Wakeup | FrameKind::Exiting => {
                // outbound-only kinds; a server would never send these
                // back, but tolerate silently rather than aborting since
                // they carry no state-changing meaning either way.
            }
            other => effects.push(Effect::ProtocolViolation(format!(
                "unexpected frame {other:?} in ATTACHED phase"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Command;

    fn cfg() -> ClientConfig {
        ClientConfig::new("/tmp/sock", Command::Argv(vec!["new-session".into()]))
    }

    #[test]
    fn ready_promotes_to_attached_and_resizes() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        let effects = dispatcher.dispatch(&mut state, &cfg(), Some(Frame::empty(FrameKind::Ready)));
        assert_eq!(state.phase(), Phase::Attached);
        assert!(matches!(effects[0], Effect::NarrowPrivilege));
        assert!(matches!(effects[1], Effect::DisarmStdin));
        assert!(matches!(&effects[2], Effect::Send(f) if f.kind == FrameKind::Resize));
    }

    #[test]
    fn null_frame_is_lost_server() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        let effects = dispatcher.dispatch(&mut state, &cfg(), None);
        assert_eq!(state.exit_reason(), ExitReason::LostServer);
        assert_eq!(state.exit_value, 1);
        assert!(matches!(effects[0], Effect::TerminateLoop));
    }

    #[test]
    fn detach_with_session_sets_detached_reason() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        state.attach();
        let frame = Frame::nul_terminated(FrameKind::Detach, "work");
        let effects = dispatcher.dispatch(&mut state, &cfg(), Some(frame));
        assert_eq!(state.exit_reason(), ExitReason::Detached);
        assert_eq!(state.exit_session.as_deref(), Some("work"));
        assert!(matches!(&effects[0], Effect::Send(f) if f.kind == FrameKind::Exiting));
    }

    #[test]
    fn detachkill_sets_detached_hup() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        state.attach();
        let frame = Frame::nul_terminated(FrameKind::DetachKill, "work");
        dispatcher.dispatch(&mut state, &cfg(), Some(frame));
        assert_eq!(state.exit_reason(), ExitReason::DetachedHup);
        assert_eq!(state.exit_type, Some(FrameKind::DetachKill));
    }

    #[test]
    fn first_writer_wins_across_two_dispatches() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        state.attach();
        dispatcher.dispatch(
            &mut state,
            &cfg(),
            Some(Frame::nul_terminated(FrameKind::Detach, "work")),
        );
        dispatcher.dispatch(&mut state, &cfg(), None);
        assert_eq!(state.exit_reason(), ExitReason::Detached);
    }

    #[test]
    fn exec_requires_two_nul_terminated_strings() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        state.attach();
        let bad = Frame::nul_terminated(FrameKind::Exec, "echo hi");
        let effects = dispatcher.dispatch(&mut state, &cfg(), Some(bad));
        assert!(matches!(effects.last(), Some(Effect::ProtocolViolation(_))));
    }

    #[test]
    fn privilege_is_narrowed_only_once() {
        let mut dispatcher = Dispatcher::new();
        let mut state = ClientState::new();
        let first = dispatcher.dispatch(&mut state, &cfg(), Some(Frame::empty(FrameKind::Stdin)));
        let second = dispatcher.dispatch(&mut state, &cfg(), Some(Frame::empty(FrameKind::Stdin)));
        assert!(matches!(first[0], Effect::NarrowPrivilege));
        assert!(!matches!(second[0], Effect::NarrowPrivilege));
    }
}

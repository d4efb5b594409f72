use derive_more::Display;
use rustix::termios::Termios;
use weft_protocol::FrameKind;

/// `WAIT` before the server's `READY` frame; `ATTACHED` after.
///
/// Transitions exactly once, WAIT -> ATTACHED, and never backwards (see
/// [`ClientState::attach`]).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    #[display("wait")]
    Wait,
    #[display("attached")]
    Attached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    #[default]
    None,
    Detached,
    DetachedHup,
    LostTty,
    Terminated,
    LostServer,
    Exited,
    ServerExited,
}

impl ExitReason {
    /// The user-visible `[message]` derived purely from the reason (and
    /// the session name when present).
    pub fn message(self, session: Option<&str>) -> Option<String> {
        Some(match self {
            ExitReason::None => return None,
            ExitReason::Detached => match session {
                Some(name) => format!("detached (from session {name})"),
                None => "detached".to_string(),
            },
            ExitReason::DetachedHup => match session {
                Some(name) => format!("detached and SIGHUP (from session {name})"),
                None => "detached and SIGHUP".to_string(),
            },
            ExitReason::LostTty => "lost tty".to_string(),
            ExitReason::Terminated => "terminated".to_string(),
            ExitReason::LostServer => "lost server".to_string(),
            ExitReason::Exited => "exited".to_string(),
            ExitReason::ServerExited => "server exited".to_string(),
        })
    }
}

/// Mutable, per-connection client state. Owned by the event loop harness
/// rather than stored globally, so tests can construct isolated instances
/// (see the "Global state" design note).
#[derive(Debug, Default)]
pub struct ClientState {
    phase: Phase2,
    exit_reason: ExitReason,
    pub exit_value: i32,
    pub exit_type: Option<FrameKind>,
    pub exit_session: Option<String>,
    pub exec_str: Option<String>,
    pub exec_shell: Option<String>,
    pub saved_termios: Option<Termios>,
}

/// `Phase` isn't `Default`; this newtype exists purely so `ClientState` can
/// derive `Default` while still starting in `Wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase2(Phase);
impl Default for Phase2 {
    fn default() -> Self {
        Phase2(Phase::Wait)
    }
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase.0
    }

    /// Promotes the client to `ATTACHED`. A no-op (but logged) if already
    /// attached, since `READY` must never be processed twice.
    pub fn attach(&mut self) {
        debug_assert_eq!(self.phase.0, Phase::Wait, "phase may only advance once");
        self.phase = Phase2(Phase::Attached);
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    /// First-writer-wins: the first call sets both the reason and the
    /// value; later calls only update `exit_value`.
    pub fn set_exit_reason(&mut self, reason: ExitReason, value: i32) {
        if self.exit_reason == ExitReason::None {
            self.exit_reason = reason;
        }
        self.exit_value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_is_first_writer_wins() {
        let mut state = ClientState::new();
        state.set_exit_reason(ExitReason::Detached, 0);
        state.set_exit_reason(ExitReason::LostServer, 1);
        assert_eq!(state.exit_reason(), ExitReason::Detached);
        assert_eq!(state.exit_value, 1);
    }

    #[test]
    fn phase_starts_wait() {
        let state = ClientState::new();
        assert_eq!(state.phase(), Phase::Wait);
    }

    #[test]
    fn detached_message_includes_session() {
        assert_eq!(
            ExitReason::Detached.message(Some("work")),
            Some("detached (from session work)".to_string())
        );
        assert_eq!(
            ExitReason::Detached.message(None),
            Some("detached".to_string())
        );
        assert_eq!(ExitReason::None.message(None), None);
    }
}

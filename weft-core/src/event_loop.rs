//! Single-threaded reactor composing the Connector, Identity sender,
//! Dispatcher, Signal router, Stdin pump, and Exit finalizer into one run
//! loop. See spec §5 and the "signal-to-event bridging" design note.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;

use rustix::event::{poll, PollFd, PollFlags};
use rustix::fs::{fcntl_getfl, fcntl_setfl, OFlags};
use weft_protocol::Codec;
use weft_protocol::RecvOutcome;

use crate::{
    config::{ClientConfig, ClientFlags},
    connector,
    dispatcher::{Dispatcher, Effect},
    finalize,
    identity::send_identity,
    signals::{SignalAction, SignalRouter},
    state::{ClientState, ExitReason},
    stdin_pump::StdinPump,
    termios,
};

/// Owns everything the run loop touches. Constructed once per invocation;
/// never stored globally (see the "Global state" design note).
pub struct EventLoop {
    codec: Codec,
    cfg: ClientConfig,
    state: ClientState,
    dispatcher: Dispatcher,
    stdin_pump: StdinPump,
    signals: SignalRouter,
    parent_pid: i32,
}

impl EventLoop {
    /// Connects (starting the server if `spawn` is given and needed),
    /// installs the signal router, and sends the identity handshake. The
    /// loop itself hasn't started yet; call [`EventLoop::run`] for that.
    pub fn connect(
        cfg: ClientConfig,
        start_server: bool,
        spawn: impl FnOnce(Option<std::fs::File>, &std::path::Path, &std::path::Path) -> io::Result<std::os::fd::OwnedFd>,
    ) -> io::Result<Self> {
        let fd = connector::connect(&cfg.socket_path, start_server, spawn)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut codec = Codec::new(fd);
        send_identity(&mut codec, &cfg)?;

        let signals = SignalRouter::install()?;
        // SAFETY: getppid has no preconditions and always succeeds.
        let parent_pid = unsafe { libc::getppid() };

        Ok(Self {
            codec,
            cfg,
            state: ClientState::new(),
            dispatcher: Dispatcher::new(),
            stdin_pump: StdinPump::new(),
            signals,
            parent_pid,
        })
    }

    /// Runs until the dispatcher or a signal triggers termination (or an
    /// exec replaces the process image, in which case this never returns),
    /// then finalizes and returns the process exit status.
    pub fn run(mut self) -> io::Result<i32> {
        set_nonblocking(io::stdin())?;

        if self.cfg.flags.contains(ClientFlags::CONTROL_CONTROL) {
            self.state.saved_termios = Some(termios::enter_control_mode(io::stdin())?);
        }

        loop {
            if self.poll_once()? {
                break;
            }
        }

        if self.state.exit_type == Some(weft_protocol::FrameKind::Exec) {
            let shell = self.state.exec_shell.clone().unwrap_or_default();
            let execstr = self.state.exec_str.clone().unwrap_or_default();
            return Err(finalize::exec_shell_for_detach(&shell, &execstr, self.cfg.flags));
        }

        let code = finalize::finalize(&self.state, self.cfg.flags, self.parent_pid);
        Ok(code)
    }

    /// Runs one iteration: blocks in `poll(2)` until something is ready,
    /// then drains it. Returns `true` once the loop should stop.
    fn poll_once(&mut self) -> io::Result<bool> {
        let socket_fd = self.codec.as_fd();
        let signal_fd = self.signals.as_raw_fd();
        let signal_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(signal_fd) };
        let stdin = io::stdin();

        let mut fds = vec![
            PollFd::new(&socket_fd, PollFlags::IN),
            PollFd::new(&signal_fd, PollFlags::IN),
        ];
        let stdin_idx = if self.stdin_pump.is_armed() {
            fds.push(PollFd::new(&stdin.as_fd(), PollFlags::IN));
            Some(fds.len() - 1)
        } else {
            None
        };

        poll(&mut fds, None)?;

        if fds[1].revents().contains(PollFlags::IN) {
            for action in self.signals.drain(self.state.phase()) {
                if self.apply_signal(action)? {
                    return Ok(true);
                }
            }
        }

        if fds[0].revents().intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR) {
            match self.codec.poll_recv().map_err(|e| io::Error::new(io::ErrorKind::Other, e))? {
                RecvOutcome::Frames(frames) => {
                    for frame in frames {
                        let effects = self.dispatcher.dispatch(&mut self.state, &self.cfg, Some(frame));
                        if self.apply_effects(effects)? {
                            return Ok(true);
                        }
                    }
                }
                RecvOutcome::WouldBlock => {}
                RecvOutcome::Closed => {
                    let effects = self.dispatcher.dispatch(&mut self.state, &self.cfg, None);
                    if self.apply_effects(effects)? {
                        return Ok(true);
                    }
                }
            }
        }

        if let Some(idx) = stdin_idx {
            if fds[idx].revents().contains(PollFlags::IN) {
                let mut stdin = io::stdin();
                if let Some(frame) = self.stdin_pump.poll(&mut stdin)? {
                    self.codec
                        .send(&frame)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
            }
        }

        Ok(false)
    }

    /// Carries out the side effects the dispatcher decided on. Returns
    /// `true` once the loop should terminate. An `ExecShellNow` effect
    /// replaces the process image and so never returns at all on success.
    fn apply_effects(&mut self, effects: Vec<Effect>) -> io::Result<bool> {
        for effect in effects {
            match effect {
                Effect::Send(frame) => self
                    .codec
                    .send(&frame)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
                Effect::WriteStdout(bytes) => write_best_effort(&mut io::stdout(), &bytes),
                Effect::WriteStderr(bytes) => write_best_effort(&mut io::stderr(), &bytes),
                Effect::RearmStdin => self.stdin_pump.rearm(),
                Effect::DisarmStdin => self.stdin_pump.disarm(),
                Effect::NarrowPrivilege => {
                    log::debug!("narrowing privilege: identity fds have all been sent");
                }
                Effect::ExecShellNow { shell } => {
                    let err = finalize::exec_shell_now(
                        &shell,
                        self.cfg.shellcmd().unwrap_or(""),
                        self.cfg.flags,
                    );
                    return Err(err);
                }
                Effect::SuspendSelf => {
                    crate::signals::suspend_self()?;
                }
                Effect::RunLockCommand { cmd } => {
                    let _ = std::process::Command::new("/bin/sh").arg("-c").arg(&cmd).status();
                    self.codec
                        .send(&weft_protocol::Frame::empty(weft_protocol::FrameKind::Unlock))
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
                Effect::TerminateLoop => return Ok(true),
                Effect::ProtocolViolation(msg) => {
                    log::error!("protocol violation: {msg}");
                    std::process::abort();
                }
            }
        }
        Ok(false)
    }

    fn apply_signal(&mut self, action: SignalAction) -> io::Result<bool> {
        use weft_protocol::{Frame, FrameKind};
        match action {
            SignalAction::Reaped | SignalAction::NoOp => Ok(false),
            SignalAction::CleanExit => {
                self.state.set_exit_reason(ExitReason::None, 0);
                Ok(true)
            }
            SignalAction::Terminated => {
                self.state.set_exit_reason(ExitReason::Terminated, 1);
                self.codec
                    .send(&Frame::empty(FrameKind::Exiting))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(true)
            }
            SignalAction::LostTty => {
                self.state.set_exit_reason(ExitReason::LostTty, 1);
                self.codec
                    .send(&Frame::empty(FrameKind::Exiting))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(true)
            }
            SignalAction::Resize => {
                self.codec
                    .send(&Frame::empty(FrameKind::Resize))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(false)
            }
            SignalAction::Wakeup => {
                self.codec
                    .send(&Frame::empty(FrameKind::Wakeup))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(false)
            }
        }
    }
}

fn set_nonblocking(fd: impl AsFd) -> io::Result<()> {
    let flags = fcntl_getfl(&fd)?;
    fcntl_setfl(&fd, flags | OFlags::NONBLOCK)?;
    Ok(())
}

fn write_best_effort(out: &mut impl Write, bytes: &[u8]) {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        match out.write(remaining) {
            Ok(0) => break,
            Ok(n) => remaining = &remaining[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(_) => break,
        }
    }
}

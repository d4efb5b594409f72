//! Identity handshake: the fixed, ordered sequence of frames a client sends
//! immediately after connecting, with no intervening reads. See spec §4.3.

use std::{
    env,
    io::{self, IsTerminal},
    os::fd::AsRawFd,
    path::PathBuf,
};

use weft_protocol::{Codec, Frame, FrameKind, HEADER_SIZE, MAX_FRAME_PAYLOAD};

use crate::config::{ClientConfig, Command};

/// Sends `FLAGS, TERM, TTYNAME, CWD, STDIN(+fd), CLIENTPID, ENVIRON*, DONE`
/// followed by either `COMMAND` or `SHELL`, in that exact order.
pub fn send_identity(codec: &mut Codec, cfg: &ClientConfig) -> io::Result<()> {
    codec.send(&Frame::new(
        FrameKind::IdentifyFlags,
        cfg.flags.bits().to_ne_bytes(),
    ))?;

    let term = env::var("TERM").unwrap_or_default();
    codec.send(&Frame::nul_terminated(FrameKind::IdentifyTerm, &term))?;

    let tty_name = stdin_tty_name().unwrap_or_default();
    codec.send(&Frame::nul_terminated(FrameKind::IdentifyTtyName, &tty_name))?;

    let cwd = current_dir_or_fallback();
    codec.send(&Frame::nul_terminated(
        FrameKind::IdentifyCwd,
        &cwd.to_string_lossy(),
    ))?;

    let stdin_dup = rustix::io::dup(&std::io::stdin())?;
    codec.send(&Frame::with_fd(FrameKind::IdentifyStdin, stdin_dup))?;

    let pid = std::process::id() as i32;
    codec.send(&Frame::int(FrameKind::IdentifyClientPid, pid))?;

    let budget = MAX_FRAME_PAYLOAD - HEADER_SIZE;
    for (key, value) in env::vars() {
        let mut entry = Vec::with_capacity(key.len() + value.len() + 2);
        entry.extend_from_slice(key.as_bytes());
        entry.push(b'=');
        entry.extend_from_slice(value.as_bytes());
        entry.push(0);
        if entry.len() > budget {
            log::warn!("skipping oversized environment entry for {key}");
            continue;
        }
        codec.send(&Frame::new(FrameKind::IdentifyEnviron, entry))?;
    }

    codec.send(&Frame::empty(FrameKind::IdentifyDone))?;

    match &cfg.command {
        Command::ShellCmd(_) => {
            codec.send(&Frame::empty(FrameKind::Shell))?;
        }
        Command::Argv(argv) => {
            let mut payload = Vec::new();
            payload.extend_from_slice(&(argv.len() as u32).to_ne_bytes());
            for arg in argv {
                payload.extend_from_slice(arg.as_bytes());
                payload.push(0);
            }
            codec.send(&Frame::new(FrameKind::Command, payload))?;
        }
    }

    Ok(())
}

fn stdin_tty_name() -> Option<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return None;
    }
    let mut buf = vec![0u8; 256];
    loop {
        // SAFETY: stdin's fd is valid for the lifetime of this call, and
        // `buf` is a valid writable buffer of `buf.len()` bytes.
        let rc = unsafe {
            libc::ttyname_r(
                stdin.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if rc == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            return Some(String::from_utf8_lossy(&buf[..end]).into_owned());
        }
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        return None;
    }
}

fn current_dir_or_fallback() -> PathBuf {
    env::current_dir()
        .or_else(|_| env::var("HOME").map(PathBuf::from))
        .unwrap_or_else(|_| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn test_codec() -> (Codec, Codec) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        use std::os::fd::{FromRawFd, IntoRawFd};
        let a = unsafe { std::os::fd::OwnedFd::from_raw_fd(a.into_raw_fd()) };
        let b = unsafe { std::os::fd::OwnedFd::from_raw_fd(b.into_raw_fd()) };
        (Codec::new(a), Codec::new(b))
    }

    #[test]
    fn identity_frames_are_sent_in_order() {
        let (mut tx, mut rx) = test_codec();
        let cfg = ClientConfig::new("/tmp/sock", Command::Argv(vec!["new-session".into()]));
        send_identity(&mut tx, &cfg).unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        loop {
            match rx.poll_recv().unwrap() {
                weft_protocol::RecvOutcome::Frames(frames) => {
                    for f in frames {
                        kinds.push(f.kind);
                    }
                }
                weft_protocol::RecvOutcome::WouldBlock => continue,
                weft_protocol::RecvOutcome::Closed => break,
            }
        }

        let before_command: Vec<_> = kinds
            .iter()
            .take_while(|k| **k != FrameKind::Command)
            .copied()
            .collect();

        assert_eq!(
            before_command[..6],
            [
                FrameKind::IdentifyFlags,
                FrameKind::IdentifyTerm,
                FrameKind::IdentifyTtyName,
                FrameKind::IdentifyCwd,
                FrameKind::IdentifyStdin,
                FrameKind::IdentifyClientPid,
            ]
        );
        assert_eq!(*before_command.last().unwrap(), FrameKind::IdentifyDone);
        assert_eq!(kinds.last(), Some(&FrameKind::Command));
    }
}

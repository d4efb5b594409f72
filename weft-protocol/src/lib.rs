pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{Codec, RecvOutcome};
pub use error::CodecError;
pub use frame::{Frame, FrameKind, StdinRecord, HEADER_SIZE, MAX_FRAME_PAYLOAD, STDIN_CHUNK};

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn pair() -> (Codec, Codec) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        use std::os::fd::{IntoRawFd, FromRawFd};
        let a = unsafe { std::os::fd::OwnedFd::from_raw_fd(a.into_raw_fd()) };
        let b = unsafe { std::os::fd::OwnedFd::from_raw_fd(b.into_raw_fd()) };
        (Codec::new(a), Codec::new(b))
    }

    #[test]
    fn round_trips_plain_frame() {
        let (mut tx, mut rx) = pair();
        tx.send(&Frame::int(FrameKind::Exit, 7)).unwrap();

        let frames = loop {
            match rx.poll_recv().unwrap() {
                RecvOutcome::Frames(f) if !f.is_empty() => break f,
                RecvOutcome::Frames(_) | RecvOutcome::WouldBlock => continue,
                RecvOutcome::Closed => panic!("unexpected close"),
            }
        };

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Exit);
        assert_eq!(frames[0].parse_optional_int(), Some(Some(7)));
    }

    #[test]
    fn detects_peer_close() {
        let (tx, mut rx) = pair();
        drop(tx);
        let outcome = loop {
            match rx.poll_recv().unwrap() {
                RecvOutcome::WouldBlock => continue,
                other => break other,
            }
        };
        assert!(matches!(outcome, RecvOutcome::Closed));
    }

    #[test]
    fn nul_terminated_round_trip() {
        let frame = Frame::nul_terminated(FrameKind::IdentifyTerm, "xterm-256color");
        assert_eq!(frame.parse_nul_terminated(), Some("xterm-256color"));
    }

    #[test]
    fn exec_payload_requires_two_strings() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"echo hi");
        payload.push(0);
        payload.extend_from_slice(b"/bin/sh");
        payload.push(0);
        let frame = Frame::new(FrameKind::Exec, payload);
        assert_eq!(frame.parse_exec(), Some(("echo hi", "/bin/sh")));

        let single = Frame::nul_terminated(FrameKind::Exec, "echo hi");
        assert_eq!(single.parse_exec(), None);
    }
}

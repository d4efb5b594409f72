//! Forwards local stdin to the server as `STDIN` frames while the client is
//! in the WAIT phase. Suspended for the duration of ATTACHED, since the
//! server owns the tty at that point. See spec §4.4.

use std::io::{self, Read};

use weft_protocol::{Frame, FrameKind, StdinRecord, STDIN_CHUNK};

/// Edge-triggered: a single readiness notification produces at most one
/// `read(2)`. EOF and errors are single-shot — once sent, the pump must be
/// explicitly re-armed by a server-sent `STDIN` (resume) frame.
pub struct StdinPump {
    armed: bool,
    finished: bool,
}

impl Default for StdinPump {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinPump {
    pub fn new() -> Self {
        Self {
            armed: true,
            finished: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Re-enables the pump on receipt of a server `STDIN` frame.
    pub fn rearm(&mut self) {
        self.armed = true;
        self.finished = false;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Called once when stdin becomes readable. Reads at most one chunk
    /// and returns the frame to forward, if any. Returns `Ok(None)` on
    /// `EINTR`/`EAGAIN` (try again on the next readiness notification), and
    /// disarms itself after a single EOF or error record.
    pub fn poll(&mut self, stdin: &mut impl Read) -> io::Result<Option<Frame>> {
        if !self.armed || self.finished {
            return Ok(None);
        }

        let mut buf = [0u8; STDIN_CHUNK];
        let record = match stdin.read(&mut buf) {
            Ok(0) => StdinRecord::eof(),
            Ok(n) => StdinRecord::data(buf, n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(_) => StdinRecord::error(),
        };

        let single_shot = record.size <= 0;
        if single_shot {
            self.finished = true;
            self.armed = false;
        }

        Ok(Some(Frame::new(FrameKind::Stdin, record.encode())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn forwards_one_chunk_per_poll() {
        let mut pump = StdinPump::new();
        let mut input = Cursor::new(b"hello".to_vec());
        let frame = pump.poll(&mut input).unwrap().unwrap();
        let record = StdinRecord::decode(&frame.payload).unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(&record.data[..5], b"hello");
        assert!(pump.is_armed());
    }

    #[test]
    fn eof_is_single_shot() {
        let mut pump = StdinPump::new();
        let mut input = Cursor::new(Vec::new());
        let frame = pump.poll(&mut input).unwrap().unwrap();
        let record = StdinRecord::decode(&frame.payload).unwrap();
        assert_eq!(record.size, 0);
        assert!(!pump.is_armed());

        // disarmed: a further poll produces nothing until rearmed
        assert!(pump.poll(&mut input).unwrap().is_none());
        pump.rearm();
        assert!(pump.is_armed());
    }
}

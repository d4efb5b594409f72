use std::os::fd::OwnedFd;

use derive_more::Display;

/// Maximum payload a single frame may carry. Identity sender skips
/// environment entries that would not fit after the header.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024;

/// `type` (u16) + `len` (u32) + `peer` (u32), native-endian, local-only wire.
pub const HEADER_SIZE: usize = 2 + 4 + 4;

/// Number of data bytes carried in a single [`StdinRecord`].
pub const STDIN_CHUNK: usize = 512;

/// Tag carried in every frame header. Values are stable across the wire and
/// must never be renumbered once a peer depends on them.
#[repr(u16)]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    IdentifyFlags = 1,
    IdentifyTerm,
    IdentifyTtyName,
    IdentifyCwd,
    IdentifyStdin,
    IdentifyClientPid,
    IdentifyEnviron,
    IdentifyDone,
    Command,
    Shell,
    Exit,
    Shutdown,
    Ready,
    Stdin,
    Stdout,
    Stderr,
    Version,
    Detach,
    DetachKill,
    Exited,
    Exec,
    Resize,
    Wakeup,
    Exiting,
    Suspend,
    Lock,
    Unlock,
}

impl FrameKind {
    pub fn from_tag(tag: u16) -> Option<Self> {
        use FrameKind::*;
        Some(match tag {
            1 => IdentifyFlags,
            2 => IdentifyTerm,
            3 => IdentifyTtyName,
            4 => IdentifyCwd,
            5 => IdentifyStdin,
            6 => IdentifyClientPid,
            7 => IdentifyEnviron,
            8 => IdentifyDone,
            9 => Command,
            10 => Shell,
            11 => Exit,
            12 => Shutdown,
            13 => Ready,
            14 => Stdin,
            15 => Stdout,
            16 => Stderr,
            17 => Version,
            18 => Detach,
            19 => DetachKill,
            20 => Exited,
            21 => Exec,
            22 => Resize,
            23 => Wakeup,
            24 => Exiting,
            25 => Suspend,
            26 => Lock,
            27 => Unlock,
            _ => return None,
        })
    }
}

/// A single inbound or outbound frame.
///
/// `fd` is only ever populated on `IdentifyStdin` (outbound, duplicated
/// stdin) and is never sent back down by the server for any other kind in
/// this client's subset of the protocol.
#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Box<[u8]>,
    pub fd: Option<OwnedFd>,
    /// Low byte of the peer id carried by the header this frame arrived in.
    /// `0` for locally constructed (outbound) frames.
    pub peer_protocol_version: u8,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            fd: None,
            peer_protocol_version: 0,
        }
    }

    pub fn empty(kind: FrameKind) -> Self {
        Self::new(kind, Box::default())
    }

    pub fn with_fd(kind: FrameKind, fd: OwnedFd) -> Self {
        Self {
            kind,
            payload: Box::default(),
            fd: Some(fd),
            peer_protocol_version: 0,
        }
    }

    /// Encodes a NUL-terminated string payload, the shape used by
    /// `IDENTIFY_TERM`, `IDENTIFY_TTYNAME`, `IDENTIFY_CWD`, `SHELL`,
    /// `DETACH`/`DETACHKILL` and the `LOCK` command string.
    pub fn nul_terminated(kind: FrameKind, s: &str) -> Self {
        let mut payload = Vec::with_capacity(s.len() + 1);
        payload.extend_from_slice(s.as_bytes());
        payload.push(0);
        Self::new(kind, payload)
    }

    pub fn int(kind: FrameKind, value: i32) -> Self {
        Self::new(kind, value.to_ne_bytes())
    }

    /// Parses a single NUL-terminated string. Fails if the trailing byte is
    /// missing or embedded NULs would make the string ambiguous.
    pub fn parse_nul_terminated(&self) -> Option<&str> {
        let bytes = &self.payload;
        let (&last, rest) = bytes.split_last()?;
        if last != 0 {
            return None;
        }
        std::str::from_utf8(rest).ok()
    }

    /// Parses the `EXIT`/`SHUTDOWN` "0 or int" shape: empty payload means
    /// no status was carried, a 4-byte payload is a native-endian `i32`.
    pub fn parse_optional_int(&self) -> Option<Option<i32>> {
        match self.payload.len() {
            0 => Some(None),
            4 => {
                let bytes: [u8; 4] = self.payload[..].try_into().ok()?;
                Some(Some(i32::from_ne_bytes(bytes)))
            }
            _ => None,
        }
    }

    /// Parses the `EXEC` payload: two consecutive NUL-terminated strings
    /// (shellcmd, then shell), neither empty, totaling exactly the payload
    /// length. See the open question in the client spec: a single
    /// NUL-terminated string is rejected rather than accepted as a
    /// "shellcmd with empty shell".
    pub fn parse_exec(&self) -> Option<(&str, &str)> {
        let bytes = &self.payload[..];
        let first_nul = bytes.iter().position(|&b| b == 0)?;
        let (first, rest) = bytes.split_at(first_nul);
        let rest = &rest[1..];
        let (&last, second) = rest.split_last()?;
        if last != 0 {
            return None;
        }
        if first.is_empty() || second.is_empty() {
            return None;
        }
        let first = std::str::from_utf8(first).ok()?;
        let second = std::str::from_utf8(second).ok()?;
        Some((first, second))
    }
}

/// The fixed-size record sent for every `STDIN` frame payload.
///
/// `size` mirrors a `read(2)` return value: positive is a byte count,
/// `0` is EOF, negative is an error. The pump sends this record verbatim
/// regardless of how many bytes were actually read, padding with zeroes.
#[derive(Debug, Clone, Copy)]
pub struct StdinRecord {
    pub size: i32,
    pub data: [u8; STDIN_CHUNK],
}

impl StdinRecord {
    pub fn eof() -> Self {
        Self {
            size: 0,
            data: [0; STDIN_CHUNK],
        }
    }

    pub fn error() -> Self {
        Self {
            size: -1,
            data: [0; STDIN_CHUNK],
        }
    }

    pub fn data(buf: [u8; STDIN_CHUNK], len: usize) -> Self {
        debug_assert!(len <= STDIN_CHUNK);
        Self {
            size: len as i32,
            data: buf,
        }
    }

    pub fn encode(&self) -> Box<[u8]> {
        let mut out = Vec::with_capacity(4 + STDIN_CHUNK);
        out.extend_from_slice(&self.size.to_ne_bytes());
        out.extend_from_slice(&self.data);
        out.into_boxed_slice()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 4 + STDIN_CHUNK {
            return None;
        }
        let size = i32::from_ne_bytes(bytes[0..4].try_into().ok()?);
        let mut data = [0u8; STDIN_CHUNK];
        data.copy_from_slice(&bytes[4..]);
        Some(Self { size, data })
    }
}

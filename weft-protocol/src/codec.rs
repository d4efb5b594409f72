use std::{
    collections::VecDeque,
    io::{self, IoSlice, IoSliceMut},
    mem::MaybeUninit,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
};

use rustix::net::{
    self, RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, ReturnFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags,
};

use crate::{
    error::CodecError,
    frame::{Frame, FrameKind, HEADER_SIZE, MAX_FRAME_PAYLOAD},
};

/// What a single readiness-driven [`Codec::poll_recv`] produced.
pub enum RecvOutcome {
    /// Zero or more complete frames were decoded from the bytes available.
    Frames(Vec<Frame>),
    /// The socket had no data ready; the caller should wait for the next
    /// readable notification.
    WouldBlock,
    /// The peer closed the connection. Corresponds to the spec's "null
    /// frame" delivery.
    Closed,
}

/// The narrow send/recv/close capability the client core depends on.
///
/// Holds an accumulation buffer so a frame spanning multiple `recvmsg`
/// calls is reassembled transparently; callers only ever see whole frames.
pub struct Codec {
    fd: OwnedFd,
    read_buf: Vec<u8>,
    fd_queue: VecDeque<OwnedFd>,
}

impl Codec {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd,
            read_buf: Vec::with_capacity(HEADER_SIZE + MAX_FRAME_PAYLOAD),
            fd_queue: VecDeque::new(),
        }
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }

    /// Sends a single frame, attaching `frame.fd` as an `SCM_RIGHTS`
    /// ancillary message when present. Identity frames are sent with no
    /// intervening reads, so this never buffers partial writes internally;
    /// a short write is looped to completion.
    pub fn send(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&(frame.kind as u16).to_ne_bytes());
        header[2..6].copy_from_slice(&(frame.payload.len() as u32).to_ne_bytes());
        header[6..10].copy_from_slice(&0u32.to_ne_bytes());

        let iov = [IoSlice::new(&header), IoSlice::new(&frame.payload)];

        let mut space = [MaybeUninit::uninit(); 64];
        let mut ancillary = SendAncillaryBuffer::new(&mut space);
        if let Some(fd) = &frame.fd {
            let fds = [fd.as_fd()];
            ancillary.push(SendAncillaryMessage::ScmRights(&fds));
        }
        self.send_all(&iov, &mut ancillary)
    }

    fn send_all(
        &self,
        iov: &[IoSlice<'_>],
        ancillary: &mut SendAncillaryBuffer<'_, '_, '_>,
    ) -> Result<(), CodecError> {
        loop {
            match net::sendmsg(&self.fd, iov, ancillary, SendFlags::NOSIGNAL) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CodecError::Io(e.into())),
            }
        }
    }

    /// Performs one non-blocking `recvmsg` and decodes as many complete
    /// frames as the accumulated buffer now contains.
    pub fn poll_recv(&mut self) -> Result<RecvOutcome, CodecError> {
        let mut chunk = [0u8; 16 * 1024];
        let mut control_space = [MaybeUninit::uninit(); 4096];
        let data_buffer = &mut [IoSliceMut::new(&mut chunk)];
        let mut ancillary = RecvAncillaryBuffer::new(&mut control_space);

        let recv_msg = match net::recvmsg(
            &self.fd,
            data_buffer,
            &mut ancillary,
            RecvFlags::CMSG_CLOEXEC | RecvFlags::DONTWAIT,
        ) {
            Ok(recv_msg) => recv_msg,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(RecvOutcome::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(RecvOutcome::WouldBlock),
            Err(e) => return Err(CodecError::Io(e.into())),
        };

        if recv_msg.flags.contains(ReturnFlags::TRUNC) {
            return Err(CodecError::TruncatedControl);
        }
        if recv_msg.flags.contains(ReturnFlags::CTRUNC) {
            return Err(CodecError::TruncatedControl);
        }

        for message in ancillary.drain() {
            match message {
                RecvAncillaryMessage::ScmRights(fds) => self.fd_queue.extend(fds),
                _ => return Err(CodecError::InvalidControl),
            }
        }

        if recv_msg.bytes == 0 {
            // a zero-length recv with no bytes pending means the peer shut
            // its write half: treat as connection loss once the buffer is
            // drained of any already-decoded frames.
            return Ok(RecvOutcome::Closed);
        }

        self.read_buf.extend_from_slice(&chunk[..recv_msg.bytes]);
        let mut frames = Vec::new();
        while let Some(frame) = self.try_decode_one()? {
            frames.push(frame);
        }
        Ok(RecvOutcome::Frames(frames))
    }

    fn try_decode_one(&mut self) -> Result<Option<Frame>, CodecError> {
        if self.read_buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let tag = u16::from_ne_bytes(self.read_buf[0..2].try_into().unwrap());
        let len = u32::from_ne_bytes(self.read_buf[2..6].try_into().unwrap()) as usize;
        let peer = u32::from_ne_bytes(self.read_buf[6..10].try_into().unwrap());

        if len > MAX_FRAME_PAYLOAD {
            return Err(CodecError::PayloadTooLarge {
                len,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        if self.read_buf.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        let kind = FrameKind::from_tag(tag).ok_or(CodecError::UnknownFrameKind(tag))?;
        let payload = self.read_buf[HEADER_SIZE..HEADER_SIZE + len]
            .to_vec()
            .into_boxed_slice();
        self.read_buf.drain(0..HEADER_SIZE + len);

        let fd = if kind == FrameKind::IdentifyStdin {
            self.fd_queue.pop_front()
        } else {
            None
        };

        Ok(Some(Frame {
            kind,
            payload,
            fd,
            peer_protocol_version: (peer & 0xff) as u8,
        }))
    }
}

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error on frame socket: {_0}")]
    Io(#[from] io::Error),
    #[error("control message was truncated; a passed file descriptor was lost")]
    TruncatedControl,
    #[error("received an unexpected ancillary message kind")]
    InvalidControl,
    #[error("peer sent an unknown frame type tag {_0}")]
    UnknownFrameKind(u16),
    #[error("peer frame payload ({len}) exceeds MAX_FRAME_PAYLOAD ({max})")]
    PayloadTooLarge { len: usize, max: usize },
}

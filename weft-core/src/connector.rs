//! Locates, locks, and optionally starts the server, then hands back a
//! connected, non-blocking socket. See spec §4.2.

use std::{
    fs::File,
    io,
    os::fd::OwnedFd,
    path::{Path, PathBuf},
};

use rustix::net::{self, AddressFamily, SocketAddrUnix, SocketFlags, SocketType};
use thiserror::Error;

use crate::lock::{self, LockOutcome};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("socket path is too long for a unix domain address")]
    NameTooLong,
    #[error("failed to create socket: {_0}")]
    SocketCreate(#[source] io::Error),
    #[error("server is not running and starting one was not requested")]
    Refused,
    #[error("failed to remove stale socket path: {_0}")]
    Unlink(#[source] io::Error),
    #[error("server-start function failed: {_0}")]
    ServerStart(#[source] io::Error),
    #[error("i/o error while connecting: {_0}")]
    Io(#[from] io::Error),
}

struct Attempt {
    lock_path: PathBuf,
    lock_fd: Option<File>,
    locked: bool,
}

impl Attempt {
    fn new(socket_path: &Path) -> Self {
        Self {
            lock_path: PathBuf::from(format!("{}.lock", socket_path.display())),
            lock_fd: None,
            locked: false,
        }
    }
}

/// Connects to `socket_path`. If the server isn't listening and
/// `start_server` is true, races a filesystem lock against any other
/// client that might also be starting it, then calls `spawn` — which
/// receives the lock file (if one was opened) plus both paths, and must
/// return an already-connected socket (the way the out-of-scope server
/// process does).
pub fn connect(
    socket_path: &Path,
    start_server: bool,
    spawn: impl FnOnce(Option<File>, &Path, &Path) -> io::Result<OwnedFd>,
) -> Result<OwnedFd, ConnectError> {
    let mut attempt: Option<Attempt> = None;

    loop {
        match try_connect(socket_path) {
            Ok(fd) => return Ok(fd),
            Err(ConnectTryError::NameTooLong) => return Err(ConnectError::NameTooLong),
            Err(ConnectTryError::SocketCreate(e)) => return Err(ConnectError::SocketCreate(e)),
            Err(ConnectTryError::Other(e)) => return Err(ConnectError::Io(e)),
            Err(ConnectTryError::Refused) => {
                if !start_server {
                    return Err(ConnectError::Refused);
                }

                let state = attempt.get_or_insert_with(|| Attempt::new(socket_path));

                if !state.locked {
                    match lock::acquire(&state.lock_path) {
                        LockOutcome::Owned(file) => {
                            state.locked = true;
                            state.lock_fd = Some(file);
                            // retry even though we now hold the lock: another
                            // client may have started and released the
                            // server between our failed connect and our
                            // lock acquisition.
                            continue;
                        }
                        LockOutcome::Retry => {
                            // someone else is probably starting the server;
                            // do not take the lock ourselves, just retry.
                            continue;
                        }
                        LockOutcome::Fail { fd, error } => {
                            log::warn!("advisory lock unavailable, starting server anyway: {error}");
                            state.locked = true;
                            state.lock_fd = fd;
                            return spawn_server(socket_path, state, spawn);
                        }
                    }
                } else {
                    // already passed through the lock path once and the
                    // connect still failed: start the server ourselves.
                    return spawn_server(socket_path, state, spawn);
                }
            }
        }
    }
}

fn spawn_server(
    socket_path: &Path,
    state: &mut Attempt,
    spawn: impl FnOnce(Option<File>, &Path, &Path) -> io::Result<OwnedFd>,
) -> Result<OwnedFd, ConnectError> {
    if let Err(e) = std::fs::remove_file(socket_path) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(ConnectError::Unlink(e));
        }
    }
    let lock_fd = state.lock_fd.take();
    spawn(lock_fd, &state.lock_path, socket_path).map_err(ConnectError::ServerStart)
}

enum ConnectTryError {
    NameTooLong,
    SocketCreate(io::Error),
    Refused,
    Other(io::Error),
}

fn try_connect(socket_path: &Path) -> Result<OwnedFd, ConnectTryError> {
    let addr = SocketAddrUnix::new(socket_path).map_err(|_| ConnectTryError::NameTooLong)?;

    let socket = net::socket_with(
        AddressFamily::UNIX,
        SocketType::STREAM,
        SocketFlags::NONBLOCK | SocketFlags::CLOEXEC,
        None,
    )
    .map_err(|e| ConnectTryError::SocketCreate(e.into()))?;

    match net::connect_unix(&socket, &addr) {
        Ok(()) => Ok(socket),
        Err(e) => {
            let io_err: io::Error = e.into();
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
                    Err(ConnectTryError::Refused)
                }
                _ => Err(ConnectTryError::Other(io_err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn connects_when_server_already_listening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let fd = connect(&path, false, |_, _, _| unreachable!("should not start a server"));
        assert!(fd.is_ok());
    }

    #[test]
    fn refuses_without_start_server_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");

        let result = connect(&path, false, |_, _, _| unreachable!());
        assert!(matches!(result, Err(ConnectError::Refused)));
    }

    #[test]
    fn spawns_server_when_absent_and_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let path_for_spawn = path.clone();

        let fd = connect(&path, true, move |_lock, _lock_path, socket_path| {
            assert_eq!(socket_path, path_for_spawn);
            let listener = UnixListener::bind(socket_path)?;
            let (client, _server) = std::os::unix::net::UnixStream::pair()?;
            drop(listener);
            use std::os::fd::{FromRawFd, IntoRawFd};
            Ok(unsafe { OwnedFd::from_raw_fd(client.into_raw_fd()) })
        });

        assert!(fd.is_ok());
    }

    #[test]
    fn lock_path_appends_rather_than_replaces_extension() {
        let attempt = Attempt::new(Path::new("/tmp/weft-1000/my.sock"));
        assert_eq!(attempt.lock_path, Path::new("/tmp/weft-1000/my.sock.lock"));
    }
}

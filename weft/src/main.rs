mod cli;

use std::{
    fs::File,
    io,
    os::fd::OwnedFd,
    path::Path,
    time::Duration,
};

use clap::Parser;
use weft_core::EventLoop;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = cli::Cli::parse().into_config();

    if let Some(parent) = cfg.socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let event_loop = EventLoop::connect(cfg, true, spawn_server)?;
    let code = event_loop.run()?;
    std::process::exit(code);
}

/// Starts the out-of-scope server process and reconnects once it is
/// listening. The server binary's path comes from `WEFT_SERVER_PATH`,
/// falling back to `weft-server` on `PATH` — building an actual server is
/// out of scope for this client.
fn spawn_server(lock_fd: Option<File>, _lock_path: &Path, socket_path: &Path) -> io::Result<OwnedFd> {
    // the lock fd would ordinarily be inherited by the server so it can
    // release it once its own listener is bound; dropping it here is the
    // client-only substitute for that handoff.
    drop(lock_fd);

    let server_path = std::env::var("WEFT_SERVER_PATH").unwrap_or_else(|_| "weft-server".to_string());
    std::process::Command::new(&server_path)
        .arg(socket_path)
        .spawn()
        .map_err(|e| io::Error::new(e.kind(), format!("failed to spawn {server_path}: {e}")))?;

    const ATTEMPTS: u32 = 50;
    for attempt in 0..ATTEMPTS {
        match std::os::unix::net::UnixStream::connect(socket_path) {
            Ok(stream) => {
                stream.set_nonblocking(true)?;
                use std::os::fd::{FromRawFd, IntoRawFd};
                return Ok(unsafe { OwnedFd::from_raw_fd(stream.into_raw_fd()) });
            }
            Err(e) if attempt + 1 == ATTEMPTS => return Err(e),
            Err(_) => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    unreachable!("loop above always returns on its last attempt")
}

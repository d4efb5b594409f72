//! Advisory lock guarding a concurrent server start.
//!
//! Uses the same `fs2`-backed open-then-`flock` sequence, and the same
//! open/flock race guard, as `wayne-core::lock::AdvisoryLock::aquire`: a
//! lockfile can be replaced on disk between our `open()` and our `flock()`
//! succeeding on it, so once the lock is held we `stat` the path again and
//! compare `st_dev`/`st_ino` against what we actually locked, retrying the
//! whole open-and-lock sequence on a mismatch.

use std::{
    fs::File,
    io,
    os::{linux::fs::MetadataExt, unix::fs::OpenOptionsExt},
    path::Path,
};

use fs2::FileExt;

/// Result of [`acquire`].
pub enum LockOutcome {
    /// The lock was acquired without blocking; `File` must eventually be
    /// released (by dropping it, or by handing it to a server-start
    /// routine that inherits it).
    Owned(File),
    /// The lock was held by another process. This caller blocked until it
    /// became available, then released it again — the meaning is "someone
    /// else is probably starting the server, try to connect again."
    Retry,
    /// Opening the lockfile failed, or a non-`WouldBlock` error occurred
    /// while attempting the non-blocking lock. Per the source's lock-FAIL
    /// semantics, any descriptor that was successfully opened is carried
    /// forward rather than closed, so a caller can still hand it to
    /// server-start.
    Fail { fd: Option<File>, error: io::Error },
}

/// Acquires (or waits out) the advisory lock at `lock_path`.
///
/// Never blocks indefinitely except in the documented `Retry` wait, which
/// restarts across `EINTR` the same way the spec requires. Loops on the
/// open/flock race guard described above; this never recurses, it just
/// starts the open-and-lock sequence over.
pub fn acquire(lock_path: impl AsRef<Path>) -> LockOutcome {
    let path = lock_path.as_ref();

    loop {
        let file = match File::options()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(path)
        {
            Ok(file) => file,
            Err(error) => return LockOutcome::Fail { fd: None, error },
        };

        match file.try_lock_exclusive() {
            Ok(()) => match locked_file_matches_path(path, &file) {
                Ok(true) => return LockOutcome::Owned(file),
                Ok(false) => {
                    // the lockfile was replaced on disk between our open()
                    // and our flock() succeeding on it; start over.
                    let _ = FileExt::unlock(&file);
                    drop(file);
                    continue;
                }
                Err(_) => {
                    // path "disappeared from under our feet"; same retry.
                    let _ = FileExt::unlock(&file);
                    drop(file);
                    continue;
                }
            },
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                // another client is probably starting the server; wait
                // until it releases the lock, then drop it and let the
                // caller retry the connect instead of racing to start a
                // second server.
                loop {
                    match file.lock_exclusive() {
                        Ok(()) => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = FileExt::unlock(&file);
                drop(file);
                return LockOutcome::Retry;
            }
            Err(error) => {
                return LockOutcome::Fail {
                    fd: Some(file),
                    error,
                }
            }
        }
    }
}

/// `true` iff `path` still refers to the inode backing `file`, i.e. nothing
/// replaced the lockfile on disk while we were opening and locking it.
fn locked_file_matches_path(path: &Path, file: &File) -> io::Result<bool> {
    let path_meta = std::fs::metadata(path)?;
    let file_meta = file.metadata()?;
    Ok(path_meta.st_dev() == file_meta.st_dev() && path_meta.st_ino() == file_meta.st_ino())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_caller_owns_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        match acquire(&path) {
            LockOutcome::Owned(_file) => {}
            _ => panic!("expected Owned"),
        }
    }

    #[test]
    fn second_caller_retries_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let held = match acquire(&path) {
            LockOutcome::Owned(file) => file,
            _ => panic!("expected Owned"),
        };

        let waiter = std::thread::spawn({
            let path = path.clone();
            move || acquire(&path)
        });

        // give the waiter a moment to block on the exclusive lock
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(held);

        match waiter.join().unwrap() {
            LockOutcome::Retry => {}
            _ => panic!("expected Retry"),
        }
    }

    #[test]
    fn fail_on_unopenable_path() {
        match acquire("/nonexistent/directory/should/not/exist.lock") {
            LockOutcome::Fail { fd: None, .. } => {}
            _ => panic!("expected Fail with no descriptor"),
        }
    }
}

//! PID-file utility (§6.6): create → detect existing PID → invoke a
//! caller-supplied "existing PID" callback before overwriting.
//!
//! The callback decides whether it is safe to proceed (e.g. the previous
//! process is confirmed dead) rather than the utility unconditionally
//! refusing to start, which is what distinguishes this from a bare
//! advisory-lock-or-fail scheme. An `fs2` exclusive lock still backs the
//! write so two processes racing the same callback outcome cannot both
//! proceed.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Error, Result};

/// Write the current process PID to `path`, holding an exclusive
/// advisory lock for the lifetime of the returned handle.
///
/// If `path` already contains a PID, `on_existing` is invoked with it
/// before the file is overwritten. Returning `false` aborts startup with
/// [`Error::AlreadyRegistered`]; returning `true` proceeds to overwrite
/// (the caller has judged the existing PID stale, e.g. by checking
/// `/proc/<pid>` or sending a signal 0 probe).
pub fn write_pid_file(path: &Path, on_existing: impl FnOnce(u32) -> bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Some(existing_pid) = read_existing_pid(path) {
        if !on_existing(existing_pid) {
            return Err(Error::AlreadyRegistered);
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(path)?;

    file.try_lock_exclusive()
        .map_err(|_| Error::AlreadyRegistered)?;

    let pid = std::process::id();
    {
        let mut f = &file;
        writeln!(f, "{pid}")?;
        f.flush()?;
    }

    tracing::info!(path = %path.display(), pid, "pid file written");
    Ok(file)
}

fn read_existing_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Remove the PID file at `path`. The lock releases automatically when
/// `_handle` drops; removing the file makes the cleanup visible.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove pid file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn writes_pid_when_no_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylon.pid");
        let file = write_pid_file(&path, |_| true).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        drop(file);
    }

    #[test]
    fn invokes_callback_with_existing_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylon.pid");
        fs::write(&path, "999999").unwrap();

        let seen = AtomicBool::new(false);
        let file = write_pid_file(&path, |pid| {
            seen.store(true, Ordering::SeqCst);
            assert_eq!(pid, 999999);
            true
        })
        .unwrap();
        assert!(seen.load(Ordering::SeqCst));
        drop(file);
    }

    #[test]
    fn callback_refusal_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylon.pid");
        fs::write(&path, "999999").unwrap();

        let result = write_pid_file(&path, |_| false);
        assert!(matches!(result, Err(Error::AlreadyRegistered)));
    }
}

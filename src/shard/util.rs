//! Utility functions for shard files
//!
//! Provides helpers for opening shard files, probing their size out of band,
//! shifting size-based backups and taking the advisory lock file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

use crate::shard::{RotationPolicy, ShardError, ShardResult};

/// Open a shard file for writing.
///
/// The file is created if missing. `append` selects between appending and
/// truncating; `close_on_exec` controls whether the descriptor survives
/// `exec`.
pub fn open_shard_file(path: &Path, append: bool, close_on_exec: bool) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let file = options.open(path)?;
    set_close_on_exec(&file, close_on_exec)?;

    Ok(file)
}

/// Set or clear `FD_CLOEXEC` on an open file
#[cfg(unix)]
fn set_close_on_exec(file: &File, enabled: bool) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `file` for the whole call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let wanted = if enabled {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };

    if wanted != flags {
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, wanted) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn set_close_on_exec(_file: &File, _enabled: bool) -> io::Result<()> {
    Ok(())
}

/// Size of the file currently at `path`, independent of any open handle.
///
/// Returns `None` when the path does not exist or cannot be stat'ed.
pub fn probe_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Shift size-based backups of `base` one slot down and retire the active file.
///
/// `<base>.<max>` is removed, `<base>.<i>` moves to `<base>.<i+1>` for
/// `i = max-1 ..= 1`, and finally the active file moves to `<base>.1`.
/// Missing files are skipped. Every other failure is collected and returned so
/// the caller can report it; the chain keeps going regardless.
pub fn roll_backups(base: &str, postfix: &str, max_backups: u32) -> Vec<ShardError> {
    let mut failures = Vec::new();
    let max_backups = max_backups.max(1);

    let oldest = RotationPolicy::backup_filename(base, max_backups, postfix);
    if let Err(e) = fs::remove_file(&oldest) {
        if e.kind() != io::ErrorKind::NotFound {
            failures.push(ShardError::Remove {
                path: oldest.into(),
                source: e,
            });
        }
    }

    for i in (1..max_backups).rev() {
        let source = RotationPolicy::backup_filename(base, i, postfix);
        let target = RotationPolicy::backup_filename(base, i + 1, postfix);
        if let Err(e) = rename_existing(&source, &target) {
            failures.push(e);
        }
    }

    let active = format!("{}{}", base, postfix);
    let target = RotationPolicy::backup_filename(base, 1, postfix);
    if let Err(e) = rename_existing(&active, &target) {
        failures.push(e);
    }

    failures
}

/// Rename `source` to `target`, treating a missing source as success
fn rename_existing(source: &str, target: &str) -> ShardResult<()> {
    match fs::rename(source, target) {
        Ok(()) => {
            tracing::debug!("Renamed file {} to {}", source, target);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ShardError::Rename {
            from: source.into(),
            to: target.into(),
            source: e,
        }),
    }
}

/// Create (if needed) and exclusively lock an advisory lock file.
///
/// The lock is best-effort: a lock already held by another process yields
/// an error the caller may report and ignore.
pub fn acquire_lock_file(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()?;
    Ok(file)
}

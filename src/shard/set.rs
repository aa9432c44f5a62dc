//! The set of target files backing one sink
//!
//! A [`ShardSet`] owns one [`Shard`] per configured base filename. Shards are
//! opened lazily, reopened after failures and retired according to the
//! sink's [`RotationPolicy`].

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::{util, RotationPolicy, ShardError, ShardInfo, ShardResult, ShardStats};

/// An open shard file.
///
/// Handles are shared with the buffers bound to them so a flush can write
/// without holding the sink lock. Every open produces a fresh `id`, which is
/// what buffers compare to detect that their shard was rotated underneath
/// them.
#[derive(Debug)]
pub struct ShardHandle {
    id: u64,
    index: usize,
    path: PathBuf,
    file: File,
}

impl ShardHandle {
    /// Identity of this open
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the shard this handle belongs to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Path the handle was opened with
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole buffer with a single call into the OS
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.file).write_all(buf)
    }

    /// Current size of the open file
    pub fn len(&self) -> io::Result<u64> {
        self.file.metadata().map(|m| m.len())
    }
}

/// What `rotate_if_needed` did to a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// The shard kept its handle
    Unchanged,
    /// The shard got a new handle without retiring any file
    Reopened,
    /// The active file was retired and a new one opened
    Rotated,
}

/// Result of a rotation check
#[derive(Debug)]
pub struct RotationOutcome {
    /// What happened to the shard
    pub action: RotationAction,
    /// Non-fatal failures the caller should report
    pub warnings: Vec<ShardError>,
}

impl RotationOutcome {
    fn new(action: RotationAction) -> Self {
        Self {
            action,
            warnings: Vec::new(),
        }
    }

    /// Check whether the shard's handle was replaced
    pub fn handle_changed(&self) -> bool {
        self.action != RotationAction::Unchanged
    }
}

/// One target file
#[derive(Debug)]
struct Shard {
    base: String,
    current_filename: String,
    handle: Option<Arc<ShardHandle>>,
    size_hint: u64,
    opened_once: bool,
    retry_after: Option<DateTime<Utc>>,
}

/// The target files of one sink
#[derive(Debug)]
pub struct ShardSet {
    shards: Vec<Shard>,
    postfix: String,
    append: bool,
    close_on_exec: bool,
    policy: RotationPolicy,
    reopen_delay: ChronoDuration,
    initialized: bool,
    next_handle_id: u64,
}

impl ShardSet {
    /// Create a shard set over `bases`.
    ///
    /// `postfix` is appended to every file name (`.gz` for compressed sinks).
    /// `append` only applies to the first open of each shard; reopens always
    /// append.
    pub fn new(
        bases: Vec<String>,
        postfix: impl Into<String>,
        append: bool,
        close_on_exec: bool,
        policy: RotationPolicy,
        reopen_delay: std::time::Duration,
    ) -> Self {
        let postfix = postfix.into();
        let shards = bases
            .into_iter()
            .map(|base| Shard {
                current_filename: format!("{}{}", base, postfix),
                base,
                handle: None,
                size_hint: 0,
                opened_once: false,
                retry_after: None,
            })
            .collect();

        Self {
            shards,
            postfix,
            append,
            close_on_exec,
            policy,
            reopen_delay: ChronoDuration::from_std(reopen_delay).unwrap_or(ChronoDuration::zero()),
            initialized: false,
            next_handle_id: 1,
        }
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Check if the set has no shards
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Get the rotation policy
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Check whether the initial bulk open has succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Open every shard that is not open yet.
    ///
    /// Returns the failures by shard index. The set counts as initialized
    /// once at least one shard is open.
    pub fn open_all(&mut self, now: DateTime<Utc>) -> Vec<(usize, ShardError)> {
        let mut failures = Vec::new();
        for index in 0..self.shards.len() {
            if self.shards[index].handle.is_some() {
                continue;
            }
            if let Err(e) = self.open(index, now) {
                failures.push((index, e));
            }
        }

        if self.shards.iter().any(|s| s.handle.is_some()) {
            self.initialized = true;
        }
        failures
    }

    /// Return the shard's handle, opening it first if needed
    pub fn get_or_open(&mut self, index: usize, now: DateTime<Utc>) -> ShardResult<Arc<ShardHandle>> {
        let shard = self.shards.get(index).ok_or(ShardError::OutOfRange(index))?;
        if let Some(handle) = &shard.handle {
            return Ok(Arc::clone(handle));
        }
        self.open(index, now)
    }

    /// Current handle of a shard, if open
    pub fn handle(&self, index: usize) -> Option<Arc<ShardHandle>> {
        self.shards.get(index).and_then(|s| s.handle.clone())
    }

    /// Current file name of a shard
    pub fn current_filename(&self, index: usize) -> Option<&str> {
        self.shards.get(index).map(|s| s.current_filename.as_str())
    }

    /// Release a shard's handle. Closing a closed shard does nothing.
    pub fn close(&mut self, index: usize) {
        if let Some(shard) = self.shards.get_mut(index) {
            if shard.handle.take().is_some() {
                tracing::debug!("Closed shard {} ({})", index, shard.current_filename);
            }
        }
    }

    /// Close a shard only if it still holds the handle with `id`.
    ///
    /// Returns `true` if the shard was closed.
    pub fn close_if_current(&mut self, index: usize, id: u64) -> bool {
        let current = self
            .shards
            .get(index)
            .and_then(|s| s.handle.as_ref())
            .map(|h| h.id());
        if current == Some(id) {
            self.close(index);
            true
        } else {
            false
        }
    }

    /// Close every shard
    pub fn close_all(&mut self) {
        for index in 0..self.shards.len() {
            self.close(index);
        }
    }

    /// Account for bytes written to a shard
    pub fn record_written(&mut self, index: usize, bytes: usize) {
        if let Some(shard) = self.shards.get_mut(index) {
            shard.size_hint += bytes as u64;
        }
    }

    /// Apply the rotation policy to one shard.
    ///
    /// A closed shard is opened first. An error means the shard has no usable
    /// handle and the caller should drop the record.
    pub fn rotate_if_needed(&mut self, index: usize, now: DateTime<Utc>) -> ShardResult<RotationOutcome> {
        if index >= self.shards.len() {
            return Err(ShardError::OutOfRange(index));
        }

        if let RotationPolicy::Calendar(calendar) = &mut self.policy {
            if calendar.is_due(now) {
                calendar.advance(now);
                return self.rotate_calendar(index, now);
            }
        }

        let mut outcome = if self.shards[index].handle.is_none() {
            self.open(index, now)?;
            RotationOutcome::new(RotationAction::Reopened)
        } else {
            RotationOutcome::new(RotationAction::Unchanged)
        };

        if let RotationPolicy::SizeBased {
            max_bytes,
            max_backups,
        } = self.policy
        {
            self.rotate_by_size(index, max_bytes, max_backups, now, &mut outcome)?;
        }

        Ok(outcome)
    }

    /// Snapshot every shard
    pub fn infos(&self) -> Vec<ShardInfo> {
        self.shards
            .iter()
            .enumerate()
            .map(|(index, shard)| ShardInfo {
                index,
                base: shard.base.clone(),
                filename: shard.current_filename.clone(),
                is_open: shard.handle.is_some(),
                handle_id: shard.handle.as_ref().map(|h| h.id()),
                size_hint: shard.size_hint,
            })
            .collect()
    }

    /// Aggregate statistics over every shard
    pub fn stats(&self) -> ShardStats {
        let mut stats = ShardStats::new();
        stats.shard_count = self.shards.len();
        for shard in &self.shards {
            if shard.handle.is_some() {
                stats.open_count += 1;
            }
            stats.total_size_hint += shard.size_hint;
        }
        stats
    }

    fn rotate_calendar(&mut self, index: usize, now: DateTime<Utc>) -> ShardResult<RotationOutcome> {
        tracing::debug!("Calendar rotation of {} shards", self.shards.len());
        self.close_all();

        let mut outcome = RotationOutcome::new(RotationAction::Rotated);
        for (failed, err) in self.open_all(now) {
            if failed == index {
                return Err(err);
            }
            outcome.warnings.push(err);
        }
        Ok(outcome)
    }

    fn rotate_by_size(
        &mut self,
        index: usize,
        max_bytes: u64,
        max_backups: u32,
        now: DateTime<Utc>,
        outcome: &mut RotationOutcome,
    ) -> ShardResult<()> {
        let handle = match &self.shards[index].handle {
            Some(handle) => Arc::clone(handle),
            None => return Err(ShardError::NotOpen(index)),
        };

        let size = match handle.len() {
            Ok(size) => size,
            Err(e) => {
                outcome.warnings.push(ShardError::Stat {
                    path: handle.path().to_path_buf(),
                    source: e,
                });
                return Ok(());
            }
        };
        self.shards[index].size_hint = size;
        if size < max_bytes {
            return Ok(());
        }

        // Another process may already have rotated the file behind our handle.
        let active = self.shards[index].current_filename.clone();
        let probed = util::probe_size(Path::new(&active));
        if probed.map_or(true, |s| s < max_bytes) {
            tracing::debug!("{} already rotated elsewhere, reopening", active);
            self.close(index);
            self.open(index, now)?;
            outcome.action = RotationAction::Reopened;
            return Ok(());
        }

        let base = self.shards[index].base.clone();
        let failures = util::roll_backups(&base, &self.postfix, max_backups);
        let retired = !failures.iter().any(|e| {
            matches!(e, ShardError::Rename { from, .. } if from.as_path() == Path::new(&active))
        });
        outcome.warnings.extend(failures);

        // The active file is still in place, keep writing to it
        if !retired {
            return Ok(());
        }

        self.close(index);
        self.open(index, now)?;
        outcome.action = RotationAction::Rotated;
        Ok(())
    }

    fn open(&mut self, index: usize, now: DateTime<Utc>) -> ShardResult<Arc<ShardHandle>> {
        let filename = {
            let shard = &self.shards[index];
            if let Some(until) = shard.retry_after {
                if now < until {
                    return Err(ShardError::Backoff {
                        path: PathBuf::from(&shard.current_filename),
                        until,
                    });
                }
            }
            self.policy.active_filename(&shard.base, &self.postfix, now)
        };

        let append = self.append || self.shards[index].opened_once;
        let path = PathBuf::from(&filename);
        let shard = &mut self.shards[index];
        shard.current_filename = filename;

        let file = match util::open_shard_file(&path, append, self.close_on_exec) {
            Ok(file) => file,
            Err(e) => {
                if self.reopen_delay > ChronoDuration::zero() {
                    let until = now
                        .checked_add_signed(self.reopen_delay)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    shard.retry_after = Some(until);
                }
                return Err(ShardError::open(path, e));
            }
        };

        shard.size_hint = file.metadata().map(|m| m.len()).unwrap_or(0);
        shard.opened_once = true;
        shard.retry_after = None;

        let handle = Arc::new(ShardHandle {
            id: self.next_handle_id,
            index,
            path,
            file,
        });
        self.next_handle_id += 1;
        shard.handle = Some(Arc::clone(&handle));

        tracing::debug!("Opened shard {} as {:?} (append: {})", index, handle.path(), append);
        Ok(handle)
    }
}

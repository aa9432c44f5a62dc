//! Shard management for log sinks
//!
//! A sink writes to one or more target files ("shards"). This module opens
//! them, tracks their handles and sizes, and retires active files either by
//! size (numbered backups) or by calendar schedule (timestamped names).

mod error;
mod info;
mod rotation;
mod schedule;
mod set;
mod util;

pub use error::{ShardError, ShardResult};
pub use info::{ShardInfo, ShardStats};
pub use rotation::{CalendarRotation, RotationPolicy};
pub use schedule::{Schedule, TimeBasis, MAX_MINUTE_STEP};
pub use set::{RotationAction, RotationOutcome, ShardHandle, ShardSet};

pub(crate) use util::acquire_lock_file;

/// File name postfix of gzip-compressed shards
pub(crate) const GZIP_POSTFIX: &str = ".gz";

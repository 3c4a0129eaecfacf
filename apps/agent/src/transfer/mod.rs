//! Moving bytes off a device.
//!
//! - `cancel`: the per-session cancellation token
//! - `copy`: one file, chunked and verified
//! - `walker`: a whole tree, feeding files to the copy engine
//! - `stats`: counters and the end-of-session summary

pub mod cancel;
pub mod copy;
pub mod stats;
pub mod walker;

pub use cancel::CancellationToken;
pub use copy::{CopyResult, FailureReason, FileCopyEngine, SkipReason};
pub use stats::{SkipBreakdown, TransferStats, TransferSummary, format_bytes};
pub use walker::{DirectoryWalker, WalkEnd, WalkOutcome};

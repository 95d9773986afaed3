//! Media states: per-dispatch descriptor blocks
//!
//! A media state binds a set of resident kernels plus inline configuration
//! for one unit of GPU work. States cycle `Free -> Reserved -> Submitted ->
//! Free`, the last step only once the GPU has retired the submission.

pub mod pool;
pub mod types;

pub use pool::MediaStatePool;
pub use types::{ComponentId, MediaState, MediaStateId, MediaStateList, MediaStatePoolStats};

//! Convenience re-exports for the common surface.
//!
//! ```rust,ignore
//! use reflex_sync::prelude::*;
//! ```

pub use crate::error::{Result, SyncError, ValidationError};
pub use crate::mirror::{DocMirror, MirrorOptions, Root};
pub use crate::reactive::{ListNode, MapNode};
pub use crate::value::Value;

//! Transfer data model
//!
//! Sections describe what to move, items wrap sections (or batch files)
//! together with their tuning for a trip through the work queue.

mod item;
mod section;

pub use item::*;
pub use section::*;

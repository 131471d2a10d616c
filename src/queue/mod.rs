//! Work queue and worker pool

mod stats;
mod work_queue;

pub use stats::*;
pub use work_queue::*;

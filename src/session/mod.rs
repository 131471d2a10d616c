//! Run orchestration and the completion report

mod report;
mod transfer_session;

pub use report::*;
pub use transfer_session::*;

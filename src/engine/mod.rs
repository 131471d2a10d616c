//! Transfer engine
//!
//! Executes one queued item: a section's (source, destination) pairs with
//! retries and arbitration, or one from-file batch invocation.

mod arbitrate;
mod command;
mod runner;
mod transfer;
mod url;

pub use arbitrate::*;
pub use command::*;
pub use runner::*;
pub use transfer::*;
pub use url::*;

//! # gridxfer - Parallel, Fault-Tolerant Bulk Transfers
//!
//! gridxfer schedules many independent point-to-point transfers across a
//! bounded, self-sizing pool of worker threads. Each transfer is delegated
//! to an external copy tool (`globus-url-copy`), or to a local symlink
//! when both ends are `file:` URLs.
//!
//! ## Features
//!
//! - **Bounded work queue**: producers block while `2 x parallel` items are pending
//! - **Lazy worker pool**: threads start on demand and retire when idle
//! - **Retry with back-off**: `initial`, then `backoff * 2^(n-2)` between attempts
//! - **Failure arbitration**: a replaceable rule table classifies tool output
//! - **Section policies**: `any`, `all` and `optional` across replicas
//! - **Batching**: single pairs coalesced into from-file tool invocations
//! - **Capability probe**: tool options detected once, known defects worked around
//!
//! ## Quick Start
//!
//! ```no_run
//! use gridxfer::config::TransferConfig;
//! use gridxfer::engine::{Arbiter, Engine, ToolCommand};
//! use gridxfer::model::TransferSection;
//! use gridxfer::probe::select_tool;
//! use gridxfer::session::TransferSession;
//! use std::sync::Arc;
//!
//! let config = TransferConfig::default();
//! let tool = select_tool(None).unwrap();
//! let command = ToolCommand::new(&tool.path, vec![], tool.capabilities, config.passive, config.quiet);
//! let engine = Arc::new(Engine::new(command, Arbiter::default()));
//!
//! let mut session = TransferSession::new(&config, engine);
//! session
//!     .submit(TransferSection::pair("gsiftp://a.example.org/f", "gsiftp://b.example.org/f"))
//!     .unwrap();
//! let summary = session.finish().unwrap();
//! for line in summary.text_lines(config.quiet) {
//!     println!("{}", line);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod model;
pub mod probe;
pub mod queue;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::{CliArgs, TransferConfig};
pub use engine::{Arbiter, Engine, SectionReport, Verdict};
pub use error::{GridXferError, Result, TransferError};
pub use model::{SectionPolicy, TransferItem, TransferSection};
pub use queue::WorkQueue;
pub use session::{RunSummary, TransferSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use gridxfer::prelude::*;
    //! ```

    pub use crate::batch::Batcher;
    pub use crate::config::{Placement, TransferConfig};
    pub use crate::engine::{Arbiter, Engine, Invoker, SubprocessInvoker, ToolCommand, Verdict};
    pub use crate::error::{GridXferError, Result, TransferError};
    pub use crate::manifest::{ManifestMode, ManifestReader, UriRewrite};
    pub use crate::model::{SectionPolicy, TransferItem, TransferSection, Tunables};
    pub use crate::probe::{check_proxy, select_tool, Capabilities, ToolProfile};
    pub use crate::queue::{ItemHandler, QueueStats, WorkQueue};
    pub use crate::session::{RunSummary, TransferSession};
}

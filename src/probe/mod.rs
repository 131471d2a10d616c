//! Copy tool capability probe
//!
//! Finds the external copy tool, learns which options it understands,
//! disables features with known defects, and checks the grid proxy.

mod capabilities;
mod credentials;
#[allow(clippy::module_inception)]
mod probe;
mod versions;

pub use capabilities::*;
pub use credentials::*;
pub use probe::*;
pub use versions::*;

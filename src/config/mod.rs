//! Configuration module for gridxfer
//!
//! Provides the command line definition and the immutable runtime
//! configuration built from it once at startup.

mod settings;

pub use settings::*;

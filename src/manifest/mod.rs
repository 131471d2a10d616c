//! Transfer plan parsing
//!
//! Turns the line-oriented manifest into transfer sections.

mod reader;

pub use reader::*;

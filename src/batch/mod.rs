//! From-file batching of transfer pairs

mod batcher;

pub use batcher::*;

//! Identity records on both sides of the sync.

pub mod source;
pub mod target;

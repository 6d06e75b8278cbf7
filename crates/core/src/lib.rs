//! Idsync Core — configuration, identity models, name canonicalization,
//! and the source/target abstractions shared by the sync engine.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod names;
pub mod source;
pub mod store;

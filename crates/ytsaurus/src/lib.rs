//! Idsync YTsaurus — target platform client.
//!
//! Translates access-store operations into YTsaurus HTTP proxy commands
//! against `//sys/users` and `//sys/groups`, and re-checks the platform's
//! manual-management guard before every mutation.

pub mod client;

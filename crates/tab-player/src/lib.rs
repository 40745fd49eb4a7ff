//! Cross-tab playback coordination for the music client.
//!
//! Several tabs of one browser profile share a broadcast bus. At most one of
//! them, the active player, drives audio at a time; the others forward their
//! play requests to it, and any tab takes over when nobody answers a probe.

pub mod bus;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod queue;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod surface;

//! lineport: a line-oriented TCP and UDP service.
//!
//! Every received line is trimmed and either echoed back or interpreted as a
//! slash command (`/time`, `/stats`, `/help`, `/shutdown`). TCP and UDP share
//! one port and one single-threaded event loop.

pub mod config;
pub mod loadgen;
pub mod protocol;
pub mod runtime;
pub mod stats;

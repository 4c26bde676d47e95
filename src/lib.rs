//! ffjob: the execution core of a transcode front-end.
//!
//! Compiles a structured job description into an ffmpeg command line
//! ([`job`]), runs processes with output capture and timeouts ([`process`]),
//! and delegates spawning across a sandbox boundary when the caller cannot
//! spawn itself ([`bridge`]). [`geometry`] holds the crop/scale math used to
//! build filter parameters.

pub mod bridge;
pub mod error;
pub mod geometry;
pub mod job;
pub mod process;

pub use error::{BridgeError, ProcessError};

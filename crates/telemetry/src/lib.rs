#![forbid(unsafe_code)]

//! Observability plumbing for the Renderhive node: structured logging
//! initialization and a small RAII scope timer.

/// The initialization routine for global structured logging.
pub mod init;
/// A simple RAII timer for measuring the duration of a scope.
pub mod time;

#![forbid(unsafe_code)]

//! Adapters to the content-addressed file-system daemon and the pinning
//! service.
//!
//! The daemon is driven over its local HTTP API; the pinning service over
//! its CLI, with a strict per-subcommand line grammar so nothing the tool
//! prints is ever silently ignored.

/// Public-IP discovery and announce-address assembly.
pub mod ip;
/// The daemon HTTP adapter.
pub mod ipfs;
/// The pinning-service CLI adapter and its output grammar.
pub mod pinning;

pub use ipfs::IpfsStore;
pub use pinning::PinningCli;

#![forbid(unsafe_code)]

//! Core data structures and error types for the Renderhive node coordinator.
//!
//! Everything that crosses a subsystem seam lives here: the ledger-facing
//! data model (operators, nodes, offers, requests, jobs, hive cycles), the
//! command envelope carried over consensus topics, the node configuration,
//! and the error taxonomy shared by every crate in the workspace.

/// The ledger-facing data model: accounts, operators, nodes, render jobs.
pub mod app;
/// The command envelope, the JSON-RPC body it wraps, and the method table.
pub mod command;
/// Node configuration structures loaded from `renderhive.toml`.
pub mod config;
/// The error taxonomy and the `ErrorCode` trait.
pub mod error;
/// Well-known file names, directory layout and cookie constants.
pub mod paths;

pub use app::{AccountAddress, Cid, ConsensusTimestamp};

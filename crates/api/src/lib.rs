#![forbid(unsafe_code)]

//! Trait seams between the Renderhive coordinator's subsystems.
//!
//! The lifecycle manager constructs one concrete implementation per seam and
//! passes it down by dependency injection; nothing in the workspace reaches
//! for a process-wide singleton. Tests swap any seam for an in-memory mock.

/// The consensus-service seam: topics, transactions, mirror, contract.
pub mod consensus;
/// The renderer subprocess seam.
pub mod render;
/// The content-addressed storage and pinning-service seams.
pub mod storage;

#![forbid(unsafe_code)]

//! Thin client over the external consensus service.
//!
//! Transactions are composed and frozen locally, signed where the node is
//! allowed to sign, submitted through the HTTP bridge, and confirmed against
//! the mirror. Topic subscriptions are mirror-backed dispatch tasks that
//! deliver messages in consensus order, exactly once, replayed from any
//! start time.

mod client;
mod mirror;
mod retry;
mod subscribe;
mod transaction;

pub use client::RestConsensusClient;
pub use retry::with_backoff;
pub use transaction::{SignaturePair, SignedTransaction, Transaction, TransactionBody};

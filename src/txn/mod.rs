//! Transaction Module
//!
//! Snapshot-isolated optimistic transactions over the engine.
//!
//! ## Model
//! - `begin` pins a watermark: the highest committed sequence number at
//!   that instant. Reads never observe anything newer.
//! - Writes buffer into a private write-set with no visible effect.
//! - `commit` validates first-committer-wins: if any transaction committed
//!   a write to one of this transaction's keys after the watermark was
//!   taken, commit fails with `Conflict` and the caller retries the whole
//!   transaction.
//! - Transactions never block each other while active; all coordination
//!   happens in the brief commit critical section.

mod oracle;
mod transaction;

pub use oracle::{Oracle, SnapshotGuard};
pub use transaction::{Transaction, TxnState};

//! Transactions.
//!
//! Tessera runs snapshot-isolated transactions over the table version state:
//! - **Snapshots**: a transaction reads the state as of its begin timestamp
//! - **Buffered writes**: imports, deletes, DDL and compactions are held in
//!   the transaction's write set until commit
//! - **Atomic commit**: all buffered effects become visible at one commit
//!   timestamp, or none do
//! - **First committer wins**: a commit that collides with one that already
//!   committed is rolled back with a conflict

mod commit;
mod manager;
mod ops;
mod state;
mod write_set;

pub use manager::{CleanupResult, TransactionManager};
pub use state::{Transaction, TransactionKind, TransactionState};

pub(crate) use ops::for_each_live_run;
pub(crate) use state::WriteKind;
pub(crate) use write_set::{CompactSource, CompactWrite, WriteOp};

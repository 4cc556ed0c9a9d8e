//! Transaction demarcation: identifiers, the in-memory manager and the
//! per-call transaction policy.

use std::fmt;

pub mod local;
pub mod policy;

pub use local::LocalTransactionManager;
pub use policy::TransactionPolicy;

/// Identifier of a transaction handed out by a `TransactionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction manager failures.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction {0} was rolled back")]
    RolledBack(TransactionId),
    #[error("no such transaction: {0}")]
    NoSuchTransaction(TransactionId),
    #[error("thread is already associated with transaction {0}")]
    AlreadyAssociated(TransactionId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

//! In-memory, thread-associated transaction manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use tracing::debug;

use crate::traits::TransactionManager;
use crate::tx::{TransactionError, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    RollbackOnly,
}

/// Keeps transaction state in memory. Commit and rollback do no work beyond
/// bookkeeping, which makes the manager suitable for tests and local
/// deployments without resources.
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
    associations: DashMap<ThreadId, TransactionId>,
    transactions: DashMap<TransactionId, Status>,
    next_id: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl LocalTransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions committed so far.
    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Number of transactions rolled back so far, including failed commits.
    #[must_use]
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Number of transactions not yet completed.
    #[must_use]
    pub fn active(&self) -> usize {
        self.transactions.len()
    }

    fn complete(&self, tx: TransactionId) -> Result<Status, TransactionError> {
        let (_, status) = self
            .transactions
            .remove(&tx)
            .ok_or(TransactionError::NoSuchTransaction(tx))?;
        let current = thread::current().id();
        self.associations.remove_if(&current, |_, associated| *associated == tx);
        Ok(status)
    }
}

impl TransactionManager for LocalTransactionManager {
    fn current(&self) -> Option<TransactionId> {
        self.associations
            .get(&thread::current().id())
            .map(|tx| *tx)
    }

    fn begin(&self) -> Result<TransactionId, TransactionError> {
        let thread = thread::current().id();
        if let Some(existing) = self.associations.get(&thread) {
            return Err(TransactionError::AlreadyAssociated(*existing));
        }
        let tx = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.transactions.insert(tx, Status::Active);
        self.associations.insert(thread, tx);
        debug!(%tx, "transaction begun");
        Ok(tx)
    }

    fn commit(&self, tx: TransactionId) -> Result<(), TransactionError> {
        match self.complete(tx)? {
            Status::Active => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                debug!(%tx, "transaction committed");
                Ok(())
            }
            Status::RollbackOnly => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                debug!(%tx, "rollback-only transaction rolled back on commit");
                Err(TransactionError::RolledBack(tx))
            }
        }
    }

    fn rollback(&self, tx: TransactionId) -> Result<(), TransactionError> {
        self.complete(tx)?;
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        debug!(%tx, "transaction rolled back");
        Ok(())
    }

    fn set_rollback_only(&self, tx: TransactionId) -> Result<(), TransactionError> {
        let mut status = self
            .transactions
            .get_mut(&tx)
            .ok_or(TransactionError::NoSuchTransaction(tx))?;
        *status = Status::RollbackOnly;
        Ok(())
    }

    fn is_rollback_only(&self, tx: TransactionId) -> bool {
        self.transactions
            .get(&tx)
            .is_some_and(|status| *status == Status::RollbackOnly)
    }

    fn suspend(&self) -> Option<TransactionId> {
        self.associations
            .remove(&thread::current().id())
            .map(|(_, tx)| tx)
    }

    fn resume(&self, tx: TransactionId) -> Result<(), TransactionError> {
        if !self.transactions.contains_key(&tx) {
            return Err(TransactionError::NoSuchTransaction(tx));
        }
        let thread = thread::current().id();
        if let Some(existing) = self.associations.get(&thread) {
            return Err(TransactionError::AlreadyAssociated(*existing));
        }
        self.associations.insert(thread, tx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_commit_clears_association() {
        let tm = LocalTransactionManager::new();
        let tx = tm.begin().unwrap();
        assert_eq!(tm.current(), Some(tx));
        tm.commit(tx).unwrap();
        assert_eq!(tm.current(), None);
        assert_eq!(tm.committed(), 1);
        assert_eq!(tm.active(), 0);
    }

    #[test]
    fn rollback_only_commit_fails() {
        let tm = LocalTransactionManager::new();
        let tx = tm.begin().unwrap();
        tm.set_rollback_only(tx).unwrap();
        assert!(tm.is_rollback_only(tx));
        assert!(matches!(tm.commit(tx), Err(TransactionError::RolledBack(t)) if t == tx));
        assert_eq!(tm.rolled_back(), 1);
        assert_eq!(tm.current(), None);
    }

    #[test]
    fn suspend_and_resume() {
        let tm = LocalTransactionManager::new();
        let outer = tm.begin().unwrap();
        assert_eq!(tm.suspend(), Some(outer));
        assert_eq!(tm.current(), None);

        let inner = tm.begin().unwrap();
        assert_ne!(inner, outer);
        assert!(matches!(tm.resume(outer), Err(TransactionError::AlreadyAssociated(_))));
        tm.commit(inner).unwrap();

        tm.resume(outer).unwrap();
        assert_eq!(tm.current(), Some(outer));
        tm.rollback(outer).unwrap();
    }

    #[test]
    fn transactions_are_per_thread() {
        let tm = std::sync::Arc::new(LocalTransactionManager::new());
        let tx = tm.begin().unwrap();
        let other = {
            let tm = std::sync::Arc::clone(&tm);
            std::thread::spawn(move || tm.current()).join().unwrap()
        };
        assert_eq!(other, None);
        tm.commit(tx).unwrap();
    }

    #[test]
    fn unknown_transaction_errors() {
        let tm = LocalTransactionManager::new();
        assert!(matches!(
            tm.commit(TransactionId(99)),
            Err(TransactionError::NoSuchTransaction(_))
        ));
        assert!(!tm.is_rollback_only(TransactionId(99)));
    }
}

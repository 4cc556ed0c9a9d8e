use ironbean_core::{InterfaceType, Method, Principal};

use crate::deployment::ComponentDeployment;
use crate::tx::{TransactionError, TransactionId};

/// Decides whether a caller may invoke a method.
/// Implementations: role-based (`RoleBasedSecurityService`), permit-all (tests).
pub trait SecurityService: Send + Sync {
    fn is_caller_authorized(
        &self,
        deployment: &ComponentDeployment,
        method: &Method,
        interface_type: InterfaceType,
        caller: Option<&Principal>,
    ) -> bool;
}

/// Thread-associated transaction demarcation.
///
/// A transaction begun or resumed on a thread stays associated with that
/// thread until it is committed, rolled back or suspended.
/// Implementations: in-memory (`LocalTransactionManager`), external coordinators.
pub trait TransactionManager: Send + Sync {
    /// Transaction associated with the calling thread.
    fn current(&self) -> Option<TransactionId>;

    /// Begins a transaction and associates it with the calling thread.
    fn begin(&self) -> Result<TransactionId, TransactionError>;

    /// Commits `tx` and clears the thread association. A transaction marked
    /// rollback-only is rolled back and `TransactionError::RolledBack` returned.
    fn commit(&self, tx: TransactionId) -> Result<(), TransactionError>;

    /// Rolls back `tx` and clears the thread association.
    fn rollback(&self, tx: TransactionId) -> Result<(), TransactionError>;

    fn set_rollback_only(&self, tx: TransactionId) -> Result<(), TransactionError>;

    fn is_rollback_only(&self, tx: TransactionId) -> bool;

    /// Detaches the calling thread's transaction, if any, and returns it.
    fn suspend(&self) -> Option<TransactionId>;

    /// Re-associates a suspended transaction with the calling thread.
    fn resume(&self, tx: TransactionId) -> Result<(), TransactionError>;
}

/// Security service that authorizes every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl SecurityService for PermitAll {
    fn is_caller_authorized(
        &self,
        _deployment: &ComponentDeployment,
        _method: &Method,
        _interface_type: InterfaceType,
        _caller: Option<&Principal>,
    ) -> bool {
        true
    }
}

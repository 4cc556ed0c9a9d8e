//! Per-call transaction policy: demarcation around one business method call
//! and mapping of failures to rollback outcomes.

use ironbean_core::TransactionAttribute;
use tracing::{error, warn};

use crate::container::{BeanException, ContainerError};
use crate::thread_context::CallContext;
use crate::traits::TransactionManager;
use crate::tx::{TransactionError, TransactionId};

/// Kind of the exception reported when a commit finds the transaction
/// already marked for rollback by someone else.
pub const TRANSACTION_ROLLED_BACK: &str = "TransactionRolledbackException";

/// Transaction state set up for one call by [`TransactionPolicy::create`]
/// and torn down by [`TransactionPolicy::after_invoke`].
pub struct TransactionPolicy<'a> {
    attribute: TransactionAttribute,
    tm: &'a dyn TransactionManager,
    method: String,
    /// Transaction begun for this call.
    owned: Option<TransactionId>,
    /// Caller transaction the call participates in.
    joined: Option<TransactionId>,
    /// Caller transaction detached for the duration of the call.
    suspended: Option<TransactionId>,
    /// This policy marked the transaction rollback-only.
    rollback_requested: bool,
}

impl<'a> TransactionPolicy<'a> {
    /// Applies `attribute` to the calling thread's transaction state.
    ///
    /// # Errors
    ///
    /// `TransactionRequired` for `Mandatory` without a caller transaction,
    /// `TransactionNotAllowed` for `Never` with one, `Transaction` when the
    /// manager fails to begin.
    pub fn create(
        attribute: TransactionAttribute,
        tm: &'a dyn TransactionManager,
        method: &str,
    ) -> Result<Self, ContainerError> {
        let mut policy = Self {
            attribute,
            tm,
            method: method.to_string(),
            owned: None,
            joined: None,
            suspended: None,
            rollback_requested: false,
        };
        let current = tm.current();
        match attribute {
            TransactionAttribute::Required => match current {
                Some(tx) => policy.joined = Some(tx),
                None => policy.owned = Some(tm.begin()?),
            },
            TransactionAttribute::RequiresNew => {
                policy.suspended = tm.suspend();
                match tm.begin() {
                    Ok(tx) => policy.owned = Some(tx),
                    Err(e) => {
                        policy.resume_suspended();
                        return Err(e.into());
                    }
                }
            }
            TransactionAttribute::Supports => policy.joined = current,
            TransactionAttribute::NotSupported | TransactionAttribute::BeanManaged => {
                policy.suspended = tm.suspend();
            }
            TransactionAttribute::Mandatory => match current {
                Some(tx) => policy.joined = Some(tx),
                None => {
                    return Err(ContainerError::TransactionRequired {
                        method: policy.method,
                    })
                }
            },
            TransactionAttribute::Never => {
                if current.is_some() {
                    return Err(ContainerError::TransactionNotAllowed {
                        method: policy.method,
                    });
                }
            }
        }
        Ok(policy)
    }

    #[must_use]
    pub fn attribute(&self) -> TransactionAttribute {
        self.attribute
    }

    /// Transaction the business method runs in, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionId> {
        self.owned.or(self.joined)
    }

    /// Returns `true` when the transaction was begun for this call.
    #[must_use]
    pub fn is_new_transaction(&self) -> bool {
        self.owned.is_some()
    }

    /// Handles a system exception: the instance is discarded and the
    /// transaction marked rollback-only.
    pub fn handle_system_exception(&mut self, call: &CallContext, cause: BeanException) -> ContainerError {
        call.set_discard_instance(true);
        error!(
            deployment = %call.deployment_id(),
            method = %self.method,
            error = %cause,
            "system exception"
        );
        self.mark_rollback();
        ContainerError::System {
            cause,
            caller_transaction_rolled_back: self.joined.is_some(),
        }
    }

    /// Handles an application exception: rollback only when the exception
    /// demands it. The instance stays poolable.
    pub fn handle_application_exception(&mut self, exception: BeanException, rollback: bool) -> ContainerError {
        if rollback {
            self.mark_rollback();
        }
        ContainerError::Application { exception, rollback }
    }

    /// Completes the call's transaction work: commits or rolls back an owned
    /// transaction, rolls back a bean-managed transaction left open, and
    /// resumes any suspended caller transaction. Always runs, whatever the
    /// call's outcome.
    ///
    /// # Errors
    ///
    /// An `Application` error when a commit finds the transaction marked
    /// rollback-only by someone else; a `System` or `Transaction` error (with
    /// the discard flag set) when the manager fails or a bean-managed
    /// transaction was left open.
    pub fn after_invoke(mut self, call: &CallContext) -> Result<(), ContainerError> {
        let mut outcome = Ok(());

        if let Some(tx) = self.owned.take() {
            outcome = if self.rollback_requested {
                self.tm.rollback(tx).map_err(|e| self.system_failure(call, e))
            } else {
                match self.tm.commit(tx) {
                    Ok(()) => Ok(()),
                    Err(TransactionError::RolledBack(tx)) => Err(ContainerError::Application {
                        exception: BeanException::new(
                            TRANSACTION_ROLLED_BACK,
                            format!("transaction {tx} was marked for rollback"),
                        ),
                        rollback: true,
                    }),
                    Err(e) => Err(self.system_failure(call, e)),
                }
            };
        }

        if self.attribute == TransactionAttribute::BeanManaged {
            if let Some(open) = self.tm.current() {
                if let Err(e) = self.tm.rollback(open) {
                    warn!(%open, error = %e, "rollback of abandoned bean-managed transaction failed");
                }
                call.set_discard_instance(true);
                error!(method = %self.method, %open, "bean-managed transaction left open");
                outcome = Err(ContainerError::System {
                    cause: BeanException::new(
                        BeanException::ILLEGAL_STATE,
                        format!("{} returned without completing transaction {open}", self.method),
                    ),
                    caller_transaction_rolled_back: false,
                });
            }
        }

        if let Some(tx) = self.suspended.take() {
            if let Err(e) = self.tm.resume(tx) {
                outcome = Err(self.system_failure(call, e));
            }
        }

        outcome
    }

    fn mark_rollback(&mut self) {
        if let Some(tx) = self.transaction() {
            self.rollback_requested = true;
            if let Err(e) = self.tm.set_rollback_only(tx) {
                warn!(%tx, error = %e, "failed to mark transaction rollback-only");
            }
        }
    }

    fn system_failure(&self, call: &CallContext, e: TransactionError) -> ContainerError {
        call.set_discard_instance(true);
        error!(method = %self.method, error = %e, "transaction completion failed");
        ContainerError::Transaction(e)
    }

    fn resume_suspended(&mut self) {
        if let Some(tx) = self.suspended.take() {
            if let Err(e) = self.tm.resume(tx) {
                warn!(%tx, error = %e, "failed to resume suspended transaction");
            }
        }
    }
}

impl std::fmt::Debug for TransactionPolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPolicy")
            .field("attribute", &self.attribute)
            .field("method", &self.method)
            .field("owned", &self.owned)
            .field("joined", &self.joined)
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}

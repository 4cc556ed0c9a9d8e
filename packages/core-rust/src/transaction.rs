//! Transaction demarcation attributes and failure classification.

use serde::{Deserialize, Serialize};

/// Container-managed transaction demarcation for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransactionAttribute {
    /// Join the caller's transaction, or begin one if there is none.
    #[default]
    Required,
    /// Always begin a new transaction; the caller's is suspended.
    RequiresNew,
    /// Join the caller's transaction if present; run without one otherwise.
    Supports,
    /// Suspend the caller's transaction and run without one.
    NotSupported,
    /// Join the caller's transaction; fail if there is none.
    Mandatory,
    /// Run without a transaction; fail if the caller has one.
    Never,
    /// The bean demarcates its own transactions; the caller's is suspended.
    BeanManaged,
}

impl TransactionAttribute {
    /// Parses descriptor-style names (`Required`, `REQUIRES_NEW`, `requires-new`, ...).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "required" => Some(Self::Required),
            "requiresnew" => Some(Self::RequiresNew),
            "supports" => Some(Self::Supports),
            "notsupported" => Some(Self::NotSupported),
            "mandatory" => Some(Self::Mandatory),
            "never" => Some(Self::Never),
            "beanmanaged" | "bean" => Some(Self::BeanManaged),
            _ => None,
        }
    }
}

/// Outcome category of a failure escaping a business method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionType {
    /// Unanticipated failure: the instance is discarded and the transaction
    /// rolled back.
    System,
    /// Part of the business contract: the instance stays healthy and the
    /// transaction is preserved.
    Application,
    /// Application exception that forces the transaction to roll back.
    ApplicationRollback,
}

//! `IronBean` core: values, principals, method identity, and transaction attributes
//! shared by the container and its callers.

pub mod context;
pub mod method;
pub mod transaction;
pub mod types;

pub use context::RequestContext;
pub use method::{InterfaceType, Method, MethodKind, OperationKind};
pub use transaction::{ExceptionType, TransactionAttribute};
pub use types::{Principal, Value};

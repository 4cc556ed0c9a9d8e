//! Method identity and call classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of interface declares a method.
///
/// Component-factory ("home") methods and component-object methods never
/// reach a pooled instance; only `Business` methods are dispatched to beans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodKind {
    /// Declared on a business interface and implemented by the bean.
    Business,
    /// Declared on a component-factory interface (`create*`, `remove`, ...).
    Home,
    /// Declared on the generic component-object interface (`remove`, `getHandle`, ...).
    Component,
}

/// Identity of an invoked method: declaring interface plus method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Method {
    pub interface: String,
    pub name: String,
    pub kind: MethodKind,
}

impl Method {
    /// A business method declared on `interface`.
    #[must_use]
    pub fn business(interface: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            kind: MethodKind::Business,
        }
    }

    /// A component-factory method declared on the home interface.
    #[must_use]
    pub fn home(interface: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            kind: MethodKind::Home,
        }
    }

    /// A method of the generic component-object interface.
    #[must_use]
    pub fn component(interface: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            kind: MethodKind::Component,
        }
    }

    /// Returns `true` for home `create*` methods, which answer with a proxy
    /// descriptor instead of running business logic.
    #[must_use]
    pub fn is_home_create(&self) -> bool {
        self.kind == MethodKind::Home && self.name.starts_with("create")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface, self.name)
    }
}

/// How a call reached the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceType {
    Home,
    Remote,
    LocalHome,
    Local,
    BusinessLocal,
    BusinessRemote,
    LocalBean,
    ServiceEndpoint,
    /// Timer expiration; never subject to caller authorization.
    Timeout,
}

impl InterfaceType {
    #[must_use]
    pub fn is_home(self) -> bool {
        matches!(self, InterfaceType::Home | InterfaceType::LocalHome)
    }

    #[must_use]
    pub fn is_local(self) -> bool {
        matches!(
            self,
            InterfaceType::Local
                | InterfaceType::LocalHome
                | InterfaceType::BusinessLocal
                | InterfaceType::LocalBean
        )
    }
}

/// Classification of the work currently executing on a call context.
///
/// Determines which interceptor methods apply when a chain is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    /// Ordinary business method call.
    Business,
    /// Business call arriving through a service endpoint with a message context.
    BusinessWs,
    /// Timer callback.
    Timeout,
    /// Bean and interceptor construction plus dependency injection.
    Injection,
    PostConstruct,
    PreDestroy,
}

impl OperationKind {
    /// Returns `true` for lifecycle callbacks, which never carry parameters.
    #[must_use]
    pub fn is_lifecycle(self) -> bool {
        matches!(self, OperationKind::PostConstruct | OperationKind::PreDestroy)
    }

    /// Interceptor-method selector: `BusinessWs` and `Timeout` calls use the
    /// around-invoke methods registered for `Business` unless the interceptor
    /// registered methods for them explicitly.
    #[must_use]
    pub fn fallback(self) -> Option<OperationKind> {
        match self {
            OperationKind::BusinessWs => Some(OperationKind::Business),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Business => "business",
            OperationKind::BusinessWs => "business-ws",
            OperationKind::Timeout => "timeout",
            OperationKind::Injection => "injection",
            OperationKind::PostConstruct => "post-construct",
            OperationKind::PreDestroy => "pre-destroy",
        };
        f.write_str(s)
    }
}

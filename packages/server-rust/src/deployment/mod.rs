//! Component deployment metadata.
//!
//! A [`ComponentDeployment`] describes one managed component type: how to
//! build its bean and interceptor instances, which business methods it
//! exposes, and the per-method interceptor, transaction and permission
//! tables. All tables are resolved once in [`DeploymentBuilder::build`];
//! dispatch only performs lookups.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ironbean_core::{ExceptionType, InterfaceType, TransactionAttribute, Value};

use crate::config::PoolConfig;
use crate::container::{BeanException, ContainerError};
use crate::interceptor::{InterceptorData, InterceptorInstance};
use crate::pool::CreationalContext;

pub mod method;

pub use method::{BeanMethod, BeanObject};

/// Creates a fresh bean object. Cleanup actions registered on the
/// creational context run when the instance is destroyed.
pub type BeanFactory =
    Arc<dyn Fn(&mut CreationalContext) -> anyhow::Result<BeanObject> + Send + Sync>;

/// Creates one interceptor instance for a pooled bean instance.
pub type InterceptorFactory =
    Arc<dyn Fn(&mut CreationalContext) -> anyhow::Result<InterceptorInstance> + Send + Sync>;

// ---------------------------------------------------------------------------
// DeploymentId
// ---------------------------------------------------------------------------

/// Unique identifier of a deployed component type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(Arc<str>);

impl DeploymentId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for DeploymentId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&DeploymentId> for DeploymentId {
    fn from(id: &DeploymentId) -> Self {
        id.clone()
    }
}

// ---------------------------------------------------------------------------
// MethodPermission
// ---------------------------------------------------------------------------

/// Declarative access rule for one business method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodPermission {
    /// Any caller, authenticated or not.
    #[default]
    Unchecked,
    /// Authenticated callers holding at least one of the roles.
    Roles(Vec<String>),
    /// No caller.
    Excluded,
}

impl MethodPermission {
    #[must_use]
    pub fn roles(roles: &[&str]) -> Self {
        MethodPermission::Roles(roles.iter().map(|r| (*r).to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// ComponentDeployment
// ---------------------------------------------------------------------------

type InterceptorList = Arc<[Arc<InterceptorData>]>;

/// Immutable metadata for one managed component type.
#[derive(Clone)]
pub struct ComponentDeployment {
    id: DeploymentId,
    bean_class: String,
    interfaces: HashMap<String, InterfaceType>,
    bean_factory: BeanFactory,
    interceptor_factories: BTreeMap<String, InterceptorFactory>,
    system_interceptors: Vec<Arc<InterceptorData>>,
    class_interceptors: Vec<Arc<InterceptorData>>,
    method_level_interceptors: HashMap<String, Vec<Arc<InterceptorData>>>,
    excluded_class_interceptors: HashSet<String>,
    methods: HashMap<String, BeanMethod>,
    post_construct: Option<BeanMethod>,
    pre_destroy: Option<BeanMethod>,
    transaction_attributes: HashMap<String, TransactionAttribute>,
    default_transaction_attribute: TransactionAttribute,
    permissions: HashMap<String, MethodPermission>,
    default_permission: MethodPermission,
    application_exceptions: HashMap<String, bool>,
    pool_config: Option<PoolConfig>,
    // Resolved at build time.
    resolved_interceptors: HashMap<String, InterceptorList>,
    lifecycle_interceptors: InterceptorList,
}

impl fmt::Debug for ComponentDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDeployment")
            .field("id", &self.id)
            .field("bean_class", &self.bean_class)
            .field("interfaces", &self.interfaces)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field(
                "interceptors",
                &self.interceptor_factories.keys().collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ComponentDeployment {
    /// Starts building a deployment for `bean_class` registered under `id`.
    #[must_use]
    pub fn builder(id: impl Into<DeploymentId>, bean_class: impl Into<String>) -> DeploymentBuilder {
        DeploymentBuilder::new(id.into(), bean_class.into())
    }

    #[must_use]
    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    #[must_use]
    pub fn bean_class(&self) -> &str {
        &self.bean_class
    }

    /// Interface type for calls that arrive through `interface`, if it is
    /// one of this component's interfaces.
    #[must_use]
    pub fn interface_type(&self, interface: &str) -> Option<InterfaceType> {
        self.interfaces.get(interface).copied()
    }

    #[must_use]
    pub fn business_interfaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.interfaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn bean_factory(&self) -> &BeanFactory {
        &self.bean_factory
    }

    /// Interceptor factories keyed by interceptor class name.
    #[must_use]
    pub fn interceptor_factories(&self) -> &BTreeMap<String, InterceptorFactory> {
        &self.interceptor_factories
    }

    /// The bean method matching a business method name.
    #[must_use]
    pub fn business_method(&self, name: &str) -> Option<&BeanMethod> {
        self.methods.get(name)
    }

    #[must_use]
    pub fn post_construct(&self) -> Option<&BeanMethod> {
        self.post_construct.as_ref()
    }

    #[must_use]
    pub fn pre_destroy(&self) -> Option<&BeanMethod> {
        self.pre_destroy.as_ref()
    }

    /// Ordered interceptors for a business method: system, class-level
    /// (unless excluded), then method-level.
    #[must_use]
    pub fn method_interceptors(&self, method: &str) -> &[Arc<InterceptorData>] {
        self.resolved_interceptors
            .get(method)
            .map_or(&[], |list| &list[..])
    }

    /// Interceptors whose lifecycle callbacks run at construction and destruction.
    #[must_use]
    pub fn lifecycle_interceptors(&self) -> &[Arc<InterceptorData>] {
        &self.lifecycle_interceptors
    }

    #[must_use]
    pub fn transaction_attribute(&self, method: &str) -> TransactionAttribute {
        self.transaction_attributes
            .get(method)
            .copied()
            .unwrap_or(self.default_transaction_attribute)
    }

    #[must_use]
    pub fn permission(&self, method: &str) -> &MethodPermission {
        self.permissions
            .get(method)
            .unwrap_or(&self.default_permission)
    }

    /// Classifies an exception kind against the application-exception registry.
    #[must_use]
    pub fn exception_type(&self, kind: &str) -> ExceptionType {
        match self.application_exceptions.get(kind) {
            Some(true) => ExceptionType::ApplicationRollback,
            Some(false) => ExceptionType::Application,
            None => ExceptionType::System,
        }
    }

    /// Pool sizing override for this deployment.
    #[must_use]
    pub fn pool_config(&self) -> Option<&PoolConfig> {
        self.pool_config.as_ref()
    }

    /// Returns a copy with `data` placed first among the system interceptors,
    /// ahead of every other interceptor in every chain.
    #[must_use]
    pub fn with_first_system_interceptor(
        &self,
        data: InterceptorData,
        factory: InterceptorFactory,
    ) -> ComponentDeployment {
        let mut copy = self.clone();
        copy.interceptor_factories
            .insert(data.class().to_string(), factory);
        copy.system_interceptors.insert(0, Arc::new(data));
        copy.resolve();
        copy
    }

    fn resolve(&mut self) {
        let mut resolved = HashMap::with_capacity(self.methods.len());
        for name in self.methods.keys() {
            let mut list: Vec<Arc<InterceptorData>> = self.system_interceptors.clone();
            if !self.excluded_class_interceptors.contains(name) {
                list.extend(self.class_interceptors.iter().cloned());
            }
            if let Some(method_level) = self.method_level_interceptors.get(name) {
                list.extend(method_level.iter().cloned());
            }
            resolved.insert(name.clone(), InterceptorList::from(list));
        }
        self.resolved_interceptors = resolved;

        let lifecycle: Vec<Arc<InterceptorData>> = self
            .system_interceptors
            .iter()
            .chain(self.class_interceptors.iter())
            .cloned()
            .collect();
        self.lifecycle_interceptors = InterceptorList::from(lifecycle);
    }

    fn validate(&self) -> Result<(), ContainerError> {
        let referenced = self
            .resolved_interceptors
            .values()
            .flat_map(|list| list.iter())
            .chain(self.lifecycle_interceptors.iter());
        for data in referenced {
            if !self.interceptor_factories.contains_key(data.class()) {
                return Err(ContainerError::Deployment {
                    id: self.id.clone(),
                    reason: format!("no factory for interceptor {}", data.class()),
                });
            }
        }
        for name in self
            .transaction_attributes
            .keys()
            .chain(self.permissions.keys())
            .chain(self.method_level_interceptors.keys())
        {
            if !self.methods.contains_key(name) {
                return Err(ContainerError::Deployment {
                    id: self.id.clone(),
                    reason: format!("metadata refers to unknown method {name}"),
                });
            }
        }
        if let Some(pool) = &self.pool_config {
            pool.validate().map_err(|e| ContainerError::Deployment {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DeploymentBuilder
// ---------------------------------------------------------------------------

/// Builder for [`ComponentDeployment`].
pub struct DeploymentBuilder {
    id: DeploymentId,
    bean_class: String,
    interfaces: HashMap<String, InterfaceType>,
    bean_factory: Option<BeanFactory>,
    interceptor_factories: BTreeMap<String, InterceptorFactory>,
    class_interceptors: Vec<Arc<InterceptorData>>,
    method_level_interceptors: HashMap<String, Vec<Arc<InterceptorData>>>,
    excluded_class_interceptors: HashSet<String>,
    methods: HashMap<String, BeanMethod>,
    post_construct: Option<BeanMethod>,
    pre_destroy: Option<BeanMethod>,
    transaction_attributes: HashMap<String, TransactionAttribute>,
    default_transaction_attribute: TransactionAttribute,
    permissions: HashMap<String, MethodPermission>,
    default_permission: MethodPermission,
    application_exceptions: HashMap<String, bool>,
    pool_config: Option<PoolConfig>,
}

impl DeploymentBuilder {
    fn new(id: DeploymentId, bean_class: String) -> Self {
        Self {
            id,
            bean_class,
            interfaces: HashMap::new(),
            bean_factory: None,
            interceptor_factories: BTreeMap::new(),
            class_interceptors: Vec::new(),
            method_level_interceptors: HashMap::new(),
            excluded_class_interceptors: HashSet::new(),
            methods: HashMap::new(),
            post_construct: None,
            pre_destroy: None,
            transaction_attributes: HashMap::new(),
            default_transaction_attribute: TransactionAttribute::Required,
            permissions: HashMap::new(),
            default_permission: MethodPermission::Unchecked,
            application_exceptions: HashMap::new(),
            pool_config: None,
        }
    }

    /// Registers an interface callers may invoke through.
    #[must_use]
    pub fn interface(mut self, name: impl Into<String>, interface_type: InterfaceType) -> Self {
        self.interfaces.insert(name.into(), interface_type);
        self
    }

    /// Sets the bean factory. The factory performs construction and injection.
    #[must_use]
    pub fn bean<B, F>(mut self, factory: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut CreationalContext) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        self.bean_factory = Some(Arc::new(move |cc: &mut CreationalContext| {
            factory(cc).map(|bean| Box::new(bean) as BeanObject)
        }));
        self
    }

    /// Registers a business method taking `arity` parameters.
    #[must_use]
    pub fn method<B, F>(mut self, name: &str, arity: usize, handler: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut B, &[Value]) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        self.methods
            .insert(name.to_string(), BeanMethod::typed(name, arity, handler));
        self
    }

    #[must_use]
    pub fn post_construct<B, F>(mut self, callback: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut B) -> Result<(), BeanException> + Send + Sync + 'static,
    {
        self.post_construct = Some(BeanMethod::lifecycle("postConstruct", callback));
        self
    }

    #[must_use]
    pub fn pre_destroy<B, F>(mut self, callback: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut B) -> Result<(), BeanException> + Send + Sync + 'static,
    {
        self.pre_destroy = Some(BeanMethod::lifecycle("preDestroy", callback));
        self
    }

    /// Adds a class-level interceptor. Declaration order is chain order.
    #[must_use]
    pub fn interceptor<I, F>(self, data: InterceptorData, factory: F) -> Self
    where
        I: Any + Send,
        F: Fn(&mut CreationalContext) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.interceptor_with(data, direct_factory(factory))
    }

    /// Adds a class-level interceptor whose factory decides the instance
    /// variant (for example a proxy wrapping a real handler).
    #[must_use]
    pub fn interceptor_with(mut self, data: InterceptorData, factory: InterceptorFactory) -> Self {
        self.register_factory(data.class(), factory);
        self.class_interceptors.push(Arc::new(data));
        self
    }

    /// Adds an interceptor bound to one business method only. Method-level
    /// interceptors run after class-level ones.
    #[must_use]
    pub fn method_interceptor<I, F>(mut self, method: &str, data: InterceptorData, factory: F) -> Self
    where
        I: Any + Send,
        F: Fn(&mut CreationalContext) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.register_factory(data.class(), direct_factory(factory));
        self.method_level_interceptors
            .entry(method.to_string())
            .or_default()
            .push(Arc::new(data));
        self
    }

    /// Skips class-level interceptors for `method`.
    #[must_use]
    pub fn exclude_class_interceptors(mut self, method: &str) -> Self {
        self.excluded_class_interceptors.insert(method.to_string());
        self
    }

    #[must_use]
    pub fn transaction_attribute(mut self, method: &str, attribute: TransactionAttribute) -> Self {
        self.transaction_attributes
            .insert(method.to_string(), attribute);
        self
    }

    /// Attribute for methods without an explicit one. Defaults to `Required`.
    #[must_use]
    pub fn default_transaction_attribute(mut self, attribute: TransactionAttribute) -> Self {
        self.default_transaction_attribute = attribute;
        self
    }

    #[must_use]
    pub fn permission(mut self, method: &str, permission: MethodPermission) -> Self {
        self.permissions.insert(method.to_string(), permission);
        self
    }

    /// Permission for methods without an explicit one. Defaults to `Unchecked`.
    #[must_use]
    pub fn default_permission(mut self, permission: MethodPermission) -> Self {
        self.default_permission = permission;
        self
    }

    /// Declares `kind` part of the business contract. With `rollback`, the
    /// exception also forces the transaction to roll back.
    #[must_use]
    pub fn application_exception(mut self, kind: &str, rollback: bool) -> Self {
        self.application_exceptions.insert(kind.to_string(), rollback);
        self
    }

    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = Some(config);
        self
    }

    fn register_factory(&mut self, class: &str, factory: InterceptorFactory) {
        self.interceptor_factories
            .entry(class.to_string())
            .or_insert(factory);
    }

    /// Resolves the interceptor tables and validates the metadata.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::Deployment` when the bean factory is missing,
    /// an interceptor has no factory, metadata names an unknown method, or
    /// the pool override is inconsistent.
    pub fn build(self) -> Result<ComponentDeployment, ContainerError> {
        let Some(bean_factory) = self.bean_factory else {
            return Err(ContainerError::Deployment {
                id: self.id,
                reason: "no bean factory".to_string(),
            });
        };
        let mut deployment = ComponentDeployment {
            id: self.id,
            bean_class: self.bean_class,
            interfaces: self.interfaces,
            bean_factory,
            interceptor_factories: self.interceptor_factories,
            system_interceptors: Vec::new(),
            class_interceptors: self.class_interceptors,
            method_level_interceptors: self.method_level_interceptors,
            excluded_class_interceptors: self.excluded_class_interceptors,
            methods: self.methods,
            post_construct: self.post_construct,
            pre_destroy: self.pre_destroy,
            transaction_attributes: self.transaction_attributes,
            default_transaction_attribute: self.default_transaction_attribute,
            permissions: self.permissions,
            default_permission: self.default_permission,
            application_exceptions: self.application_exceptions,
            pool_config: self.pool_config,
            resolved_interceptors: HashMap::new(),
            lifecycle_interceptors: InterceptorList::from(Vec::new()),
        };
        deployment.resolve();
        deployment.validate()?;
        Ok(deployment)
    }
}

fn direct_factory<I, F>(factory: F) -> InterceptorFactory
where
    I: Any + Send,
    F: Fn(&mut CreationalContext) -> anyhow::Result<I> + Send + Sync + 'static,
{
    Arc::new(move |cc: &mut CreationalContext| factory(cc).map(InterceptorInstance::direct))
}

#[cfg(test)]
mod tests {
    use ironbean_core::OperationKind;

    use super::*;

    struct Echo;
    struct Audit;
    struct Timing;

    fn audit() -> InterceptorData {
        InterceptorData::new("Audit").around_invoke(|_: &Audit, ctx| ctx.proceed())
    }

    fn timing() -> InterceptorData {
        InterceptorData::new("Timing").around_invoke(|_: &Timing, ctx| ctx.proceed())
    }

    fn builder() -> DeploymentBuilder {
        ComponentDeployment::builder("Echo", "com.example.EchoBean")
            .interface("EchoLocal", InterfaceType::BusinessLocal)
            .bean(|_| Ok(Echo))
            .method("echo", 1, |_: &mut Echo, args| Ok(args[0].clone()))
            .method("ping", 0, |_: &mut Echo, _| Ok(Value::Null))
    }

    fn classes(list: &[Arc<InterceptorData>]) -> Vec<&str> {
        list.iter().map(|d| d.class()).collect()
    }

    #[test]
    fn build_requires_bean_factory() {
        let err = ComponentDeployment::builder("X", "X").build().unwrap_err();
        assert!(matches!(err, ContainerError::Deployment { reason, .. } if reason == "no bean factory"));
    }

    #[test]
    fn resolves_class_then_method_interceptors() {
        let deployment = builder()
            .interceptor(audit(), |_| Ok(Audit))
            .method_interceptor("echo", timing(), |_| Ok(Timing))
            .build()
            .unwrap();

        assert_eq!(classes(deployment.method_interceptors("echo")), ["Audit", "Timing"]);
        assert_eq!(classes(deployment.method_interceptors("ping")), ["Audit"]);
        assert_eq!(classes(deployment.lifecycle_interceptors()), ["Audit"]);
        assert!(deployment.method_interceptors("missing").is_empty());
    }

    #[test]
    fn excluded_method_skips_class_interceptors() {
        let deployment = builder()
            .interceptor(audit(), |_| Ok(Audit))
            .exclude_class_interceptors("ping")
            .build()
            .unwrap();
        assert!(deployment.method_interceptors("ping").is_empty());
        assert_eq!(classes(deployment.method_interceptors("echo")), ["Audit"]);
    }

    #[test]
    fn system_interceptor_runs_first() {
        let deployment = builder()
            .interceptor(audit(), |_| Ok(Audit))
            .build()
            .unwrap();
        let with_system = deployment
            .with_first_system_interceptor(timing(), direct_factory(|_| Ok(Timing)));
        assert_eq!(classes(with_system.method_interceptors("echo")), ["Timing", "Audit"]);
        assert!(with_system.interceptor_factories().contains_key("Timing"));
        // The original is untouched.
        assert_eq!(classes(deployment.method_interceptors("echo")), ["Audit"]);
    }

    #[test]
    fn transaction_attribute_and_permission_defaults() {
        let deployment = builder()
            .transaction_attribute("ping", TransactionAttribute::NotSupported)
            .permission("echo", MethodPermission::roles(&["admin"]))
            .build()
            .unwrap();
        assert_eq!(deployment.transaction_attribute("echo"), TransactionAttribute::Required);
        assert_eq!(
            deployment.transaction_attribute("ping"),
            TransactionAttribute::NotSupported
        );
        assert_eq!(deployment.permission("ping"), &MethodPermission::Unchecked);
        assert_eq!(
            deployment.permission("echo"),
            &MethodPermission::Roles(vec!["admin".to_string()])
        );
    }

    #[test]
    fn metadata_for_unknown_method_is_rejected() {
        let err = builder()
            .transaction_attribute("nope", TransactionAttribute::Never)
            .build()
            .unwrap_err();
        assert!(matches!(err, ContainerError::Deployment { .. }));
    }

    #[test]
    fn exception_registry_classification() {
        let deployment = builder()
            .application_exception("NotFound", false)
            .application_exception("Overdrawn", true)
            .build()
            .unwrap();
        assert_eq!(deployment.exception_type("NotFound"), ExceptionType::Application);
        assert_eq!(
            deployment.exception_type("Overdrawn"),
            ExceptionType::ApplicationRollback
        );
        assert_eq!(deployment.exception_type("NullPointer"), ExceptionType::System);
    }

    #[test]
    fn interface_lookup() {
        let deployment = builder().build().unwrap();
        assert_eq!(
            deployment.interface_type("EchoLocal"),
            Some(InterfaceType::BusinessLocal)
        );
        assert_eq!(deployment.interface_type("EchoRemote"), None);
        assert!(deployment
            .lifecycle_interceptors()
            .iter()
            .all(|d| d.methods(OperationKind::PostConstruct).is_empty()));
    }
}

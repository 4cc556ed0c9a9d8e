//! Role-based caller authorization.

use ironbean_core::{InterfaceType, Method, MethodKind, Principal};
use tracing::debug;

use crate::deployment::{ComponentDeployment, MethodPermission};
use crate::traits::SecurityService;

/// Authorizes calls from the deployment's per-method permissions.
///
/// Component-factory and component-object methods are always allowed;
/// business methods follow [`MethodPermission`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleBasedSecurityService;

impl SecurityService for RoleBasedSecurityService {
    fn is_caller_authorized(
        &self,
        deployment: &ComponentDeployment,
        method: &Method,
        _interface_type: InterfaceType,
        caller: Option<&Principal>,
    ) -> bool {
        if method.kind != MethodKind::Business {
            return true;
        }
        let allowed = match deployment.permission(&method.name) {
            MethodPermission::Unchecked => true,
            MethodPermission::Excluded => false,
            MethodPermission::Roles(roles) => caller.is_some_and(|p| p.has_any_role(roles)),
        };
        if !allowed {
            debug!(
                deployment = %deployment.id(),
                method = %method,
                principal = caller.map(|p| p.id.as_str()),
                "caller not authorized"
            );
        }
        allowed
    }
}

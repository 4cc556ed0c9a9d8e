use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::container::ContainerError;
use crate::deployment::{ComponentDeployment, DeploymentId};

// ---------------------------------------------------------------------------
// DeployedComponent
// ---------------------------------------------------------------------------

/// Runtime state of a deployment.
///
/// State machine: Deployed -> Started -> Stopped (-> Started again)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DeploymentState {
    /// Registered and pooled, not yet accepting calls.
    Deployed,
    Started,
    /// Calls are rejected until started again.
    Stopped,
}

/// A registered deployment and its runtime state. The deployment metadata
/// itself never changes.
#[derive(Debug)]
pub struct DeployedComponent {
    deployment: Arc<ComponentDeployment>,
    state: ArcSwap<DeploymentState>,
}

impl DeployedComponent {
    #[must_use]
    pub fn deployment(&self) -> &Arc<ComponentDeployment> {
        &self.deployment
    }

    #[must_use]
    pub fn state(&self) -> DeploymentState {
        **self.state.load()
    }

    pub fn set_state(&self, state: DeploymentState) {
        self.state.store(Arc::new(state));
    }
}

// ---------------------------------------------------------------------------
// DeploymentRegistry
// ---------------------------------------------------------------------------

/// Registry of deployed components.
///
/// Deployments are listed, started and undeployed in registration order;
/// container shutdown undeploys in reverse order.
pub struct DeploymentRegistry {
    by_id: DashMap<DeploymentId, Arc<DeployedComponent>>,
    /// Registration order for deterministic start/shutdown sequencing.
    order: RwLock<Vec<DeploymentId>>,
}

impl DeploymentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers `deployment` in the `Deployed` state.
    ///
    /// # Errors
    ///
    /// `ContainerError::DuplicateDeployment` when the id is taken.
    pub fn register(&self, deployment: Arc<ComponentDeployment>) -> Result<Arc<DeployedComponent>, ContainerError> {
        let id = deployment.id().clone();
        let component = Arc::new(DeployedComponent {
            deployment,
            state: ArcSwap::from_pointee(DeploymentState::Deployed),
        });
        match self.by_id.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ContainerError::DuplicateDeployment { id });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&component));
            }
        }
        self.order.write().push(id);
        Ok(component)
    }

    #[must_use]
    pub fn get(&self, id: &DeploymentId) -> Option<Arc<DeployedComponent>> {
        self.by_id.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &DeploymentId) -> Option<Arc<DeployedComponent>> {
        let removed = self.by_id.remove(id).map(|(_, component)| component);
        if removed.is_some() {
            self.order.write().retain(|registered| registered != id);
        }
        removed
    }

    /// Deployment ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<DeploymentId> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for DeploymentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Bean;

    fn deployment(id: &str) -> Arc<ComponentDeployment> {
        Arc::new(
            ComponentDeployment::builder(id, "Bean")
                .bean(|_| Ok(Bean))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn register_get_remove() {
        let registry = DeploymentRegistry::new();
        let component = registry.register(deployment("a")).unwrap();
        assert_eq!(component.state(), DeploymentState::Deployed);
        assert!(registry.get(&DeploymentId::from("a")).is_some());
        assert!(registry.remove(&DeploymentId::from("a")).is_some());
        assert!(registry.get(&DeploymentId::from("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = DeploymentRegistry::new();
        registry.register(deployment("a")).unwrap();
        assert!(matches!(
            registry.register(deployment("a")),
            Err(ContainerError::DuplicateDeployment { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ids_keep_registration_order() {
        let registry = DeploymentRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register(deployment(id)).unwrap();
        }
        registry.remove(&DeploymentId::from("a"));
        let ids: Vec<String> = registry.ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[test]
    fn state_transitions() {
        let registry = DeploymentRegistry::new();
        let component = registry.register(deployment("a")).unwrap();
        component.set_state(DeploymentState::Started);
        assert_eq!(registry.get(&DeploymentId::from("a")).unwrap().state(), DeploymentState::Started);
        component.set_state(DeploymentState::Stopped);
        assert_eq!(component.state(), DeploymentState::Stopped);
    }
}

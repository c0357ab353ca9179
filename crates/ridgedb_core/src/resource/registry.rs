//! Process-scoped participant registry.

use crate::error::{CoreError, CoreResult};
use crate::resource::ResourceManager;
use parking_lot::RwLock;
use std::sync::Arc;

/// The set of participants recovery consults.
///
/// Created and filled by whoever owns the process lifetime (normally the
/// database at open), and emptied with [`drain`](Self::drain) at shutdown.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<Vec<Arc<dyn ResourceManager>>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a participant with the same name is
    /// already registered.
    pub fn register(&self, resource: Arc<dyn ResourceManager>) -> CoreResult<()> {
        let mut resources = self.resources.write();
        if resources.iter().any(|r| r.is_same_rm(resource.as_ref())) {
            return Err(CoreError::invalid_operation(format!(
                "resource '{}' already registered",
                resource.name()
            )));
        }
        resources.push(resource);
        Ok(())
    }

    /// Looks up a participant by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ResourceManager>> {
        self.resources
            .read()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    /// Returns every participant in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn ResourceManager>> {
        self.resources.read().clone()
    }

    /// Removes and returns every participant.
    pub fn drain(&self) -> Vec<Arc<dyn ResourceManager>> {
        std::mem::take(&mut *self.resources.write())
    }

    /// Number of registered participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .resources
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        f.debug_struct("ResourceRegistry")
            .field("resources", &names)
            .finish()
    }
}
